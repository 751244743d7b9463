//! Client for the OpenAI-compatible inference endpoint.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{FixerError, Result};
use crate::extract::fence_yaml;

/// Path of the chat completions endpoint below the inference base URL.
const CHAT_COMPLETIONS_PATH: &str = "/openai/v1/chat/completions";

/// Asks a model for a corrected manifest.
#[async_trait]
pub trait FixGenerator: Send + Sync {
    /// Send the prompt and return the raw response text.
    async fn request_fix(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Compose the fix request for one remediation cycle.
#[must_use]
pub fn build_fix_prompt(manifest: &str, errors: &str) -> String {
    format!(
        "This is the manifest of an application deployed in Kubernetes:\n{}\n\
         The cluster reported these errors for it:\n```\n{}\n```\n\
         Return the full corrected manifest so it can be applied as is. \
         Answer with the manifest only, in a single yaml block.",
        fence_yaml(manifest),
        errors
    )
}

/// HTTP client for `POST {base}/openai/v1/chat/completions`.
pub struct InferenceClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl InferenceClient {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, model: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: format!("{}{CHAT_COMPLETIONS_PATH}", base_url.trim_end_matches('/')),
            model: model.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl FixGenerator for InferenceClient {
    async fn request_fix(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        info!(model = %self.model, prompt_len = prompt.len(), "Requesting fix");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| FixerError::connectivity("inference request", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FixerError::connectivity("inference request", e))?;

        if !status.is_success() {
            return Err(FixerError::UnexpectedStatus {
                operation: "inference request",
                status: status.as_u16(),
                body,
            });
        }

        debug!(response_len = body.len(), "Inference response received");
        Ok(body)
    }
}

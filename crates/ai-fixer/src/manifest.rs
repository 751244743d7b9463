//! Known-good manifest for the managed workload.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{FixerError, Result};

/// Where the current manifest text comes from.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Fetch the manifest text verbatim.
    async fn fetch(&self) -> Result<String>;
}

/// Fetches the manifest from a fixed raw-content URL.
pub struct HttpManifestSource {
    client: reqwest::Client,
    url: String,
}

impl HttpManifestSource {
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch(&self) -> Result<String> {
        debug!(url = %self.url, "Fetching manifest");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FixerError::connectivity("manifest fetch", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FixerError::connectivity("manifest fetch", e))?;

        if !status.is_success() {
            return Err(FixerError::UnexpectedStatus {
                operation: "manifest fetch",
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

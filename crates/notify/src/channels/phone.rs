//! Outbound phone call channel.
//!
//! The phone service turns the text into speech and rings the operator on
//! call. The request is a plain `GET {base}/phone_call?text=<urlencoded>`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::ChannelError;
use crate::events::NotifyEvent;
use crate::NotifyChannel;

/// Path of the call endpoint on the phone service.
const PHONE_CALL_PATH: &str = "/phone_call";

/// Places a phone call through the phone service for every event.
pub struct PhoneCallChannel {
    call_url: String,
    client: reqwest::Client,
}

impl PhoneCallChannel {
    /// Create a phone channel for the service at `base_url`. Every call
    /// gives up after `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            call_url: Self::call_endpoint(base_url),
            client,
        })
    }

    fn call_endpoint(base_url: &str) -> String {
        format!("{}{PHONE_CALL_PATH}", base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl NotifyChannel for PhoneCallChannel {
    fn name(&self) -> &'static str {
        "phone"
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError> {
        info!(
            title = %event.title(),
            severity = event.severity().as_str(),
            "Calling the operator on duty"
        );

        let response = self
            .client
            .get(&self.call_url)
            .query(&[("text", event.report())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Phone service accepted the call");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn failed_rollout(report: &str) -> NotifyEvent {
        NotifyEvent::RolloutFailed {
            namespace: "app-namespace".to_string(),
            deployment: "nginx".to_string(),
            report: report.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_call_url_strips_trailing_slash() {
        assert_eq!(
            PhoneCallChannel::call_endpoint("http://phone:8000/"),
            "http://phone:8000/phone_call"
        );
    }

    #[tokio::test]
    async fn test_send_passes_report_as_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/phone_call"))
            .and(query_param("text", "pods crash & burn\nreplicas 1/3"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel = PhoneCallChannel::new(&server.uri(), Duration::from_secs(5)).unwrap();
        assert!(channel.enabled());
        channel
            .send(&failed_rollout("pods crash & burn\nreplicas 1/3"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_reports_service_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/phone_call"))
            .respond_with(ResponseTemplate::new(503).set_body_string("no operator"))
            .mount(&server)
            .await;

        let channel = PhoneCallChannel::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = channel.send(&failed_rollout("boom")).await.unwrap_err();
        assert!(matches!(err, ChannelError::Rejected { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_send_gives_up_after_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/phone_call"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let channel = PhoneCallChannel::new(&server.uri(), Duration::from_millis(200)).unwrap();
        let err = channel.send(&failed_rollout("boom")).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
    }
}

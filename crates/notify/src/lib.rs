//! Human escalation notifications for ai-fixer.
//!
//! When an applied fix does not bring a deployment back to health, somebody
//! has to be woken up. This crate owns that last step: a [`Notifier`] fans an
//! escalation [`NotifyEvent`] out to every configured [`NotifyChannel`] and
//! reports whether the calls themselves went through.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use notify::{Notifier, NotifyChannel, NotifyEvent, PhoneCallChannel};
//!
//! # async fn example() -> Result<(), notify::ChannelError> {
//! let phone: Arc<dyn NotifyChannel> = Arc::new(PhoneCallChannel::new(
//!     "http://phone-service:8000",
//!     Duration::from_secs(30),
//! )?);
//! let notifier = Notifier::with_channels(vec![phone]);
//!
//! notifier
//!     .escalate(NotifyEvent::RolloutFailed {
//!         namespace: "app-namespace".to_string(),
//!         deployment: "nginx".to_string(),
//!         report: "Back-off pulling image \"nginx:latst\"".to_string(),
//!         timestamp: chrono::Utc::now(),
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`NotifyChannel`] trait defines the interface for notification channels
//! - [`PhoneCallChannel`] places an outbound call through the phone service
//! - [`Notifier`] dispatches events to all enabled channels
//!
//! Calls are never retried: a failed notification is reported to the caller,
//! which logs it and moves on.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::phone::PhoneCallChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use events::{NotifyEvent, Severity};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Central notification dispatcher.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    disabled: bool,
}

impl Notifier {
    /// Create a notifier with specific channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        if channels.is_empty() {
            warn!("No notification channels configured");
        } else {
            info!(
                channel_count = channels.len(),
                "Notification system initialized"
            );
        }

        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a disabled notifier (for testing or when notifications are off).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
        }
    }

    /// Send a notification to every channel and wait for all of them.
    ///
    /// Returns one result per channel, in channel order.
    pub async fn notify_and_wait(
        &self,
        event: &NotifyEvent,
    ) -> Vec<(String, Result<(), ChannelError>)> {
        if self.disabled || self.channels.is_empty() {
            return vec![];
        }

        let mut results = vec![];

        for channel in &self.channels {
            let channel_name = channel.name().to_string();

            if !channel.enabled() {
                debug!(channel = %channel_name, "Channel disabled, skipping");
                continue;
            }

            let result = channel.send(event).await;
            match &result {
                Ok(()) => debug!(channel = %channel_name, "Notification sent"),
                Err(e) => error!(
                    channel = %channel_name,
                    error = %e,
                    "Failed to send notification"
                ),
            }
            results.push((channel_name, result));
        }

        results
    }

    /// Escalate to a human and fail unless at least one channel delivered.
    pub async fn escalate(&self, event: NotifyEvent) -> Result<(), ChannelError> {
        let results = self.notify_and_wait(&event).await;

        if results.is_empty() {
            return Err(ChannelError::NotConfigured(
                "no enabled notification channel".to_string(),
            ));
        }

        let mut first_error = None;
        let mut delivered = false;
        for (_, result) in results {
            match result {
                Ok(()) => delivered = true,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match (delivered, first_error) {
            (true, _) | (false, None) => Ok(()),
            (false, Some(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        sent: AtomicUsize,
        fail: bool,
    }

    impl CountingChannel {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl NotifyChannel for CountingChannel {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn enabled(&self) -> bool {
            true
        }

        async fn send(&self, _event: &NotifyEvent) -> Result<(), ChannelError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ChannelError::Undelivered("line busy".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn unverified() -> NotifyEvent {
        NotifyEvent::RolloutUnverified {
            namespace: "app-namespace".to_string(),
            deployment: "nginx".to_string(),
            report: "no status observed".to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_event_titles_and_severity() {
        let event = unverified();
        assert_eq!(event.title(), "Rollout unverified: app-namespace/nginx");
        assert_eq!(event.severity(), Severity::Warning);
        assert_eq!(event.report(), "no status observed");
    }

    #[tokio::test]
    async fn test_escalate_without_channels_fails() {
        let err = Notifier::disabled().escalate(unverified()).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_escalate_sends_once_per_channel() {
        let channel = CountingChannel::new(false);
        let notifier = Notifier::with_channels(vec![channel.clone() as Arc<dyn NotifyChannel>]);

        notifier.escalate(unverified()).await.unwrap();
        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_escalate_is_not_retried() {
        let channel = CountingChannel::new(true);
        let notifier = Notifier::with_channels(vec![channel.clone() as Arc<dyn NotifyChannel>]);

        assert!(notifier.escalate(unverified()).await.is_err());
        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);
    }
}

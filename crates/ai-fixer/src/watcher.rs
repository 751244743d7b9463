//! Warning event watcher.
//!
//! Feeds every `Warning` event of the namespace into the [`ErrorAggregator`]
//! as one formatted line. The subscription is re-opened whenever the stream
//! closes, forever, with capped exponential backoff between attempts. Only
//! the very first subscribe is allowed to fail the process.

use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::ErrorAggregator;
use crate::cluster::{ClusterEvent, EventSource};
use crate::error::Result;

/// Render an event as `[timestamp] namespace/object: reason - message`.
#[must_use]
pub fn format_warning(event: &ClusterEvent) -> String {
    let timestamp = event
        .timestamp
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();

    format!(
        "[{}] {}/{}: {} - {}",
        timestamp, event.namespace, event.object_name, event.reason, event.message
    )
}

/// Exponential delay between reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Long-lived worker turning cluster warnings into buffered lines.
pub struct EventWatcher {
    source: Arc<dyn EventSource>,
    aggregator: Arc<ErrorAggregator>,
    namespace: String,
    backoff: Backoff,
}

impl EventWatcher {
    #[must_use]
    pub fn new(
        source: Arc<dyn EventSource>,
        aggregator: Arc<ErrorAggregator>,
        namespace: impl Into<String>,
        backoff: Backoff,
    ) -> Self {
        Self {
            source,
            aggregator,
            namespace: namespace.into(),
            backoff,
        }
    }

    /// Watch until `cancel` fires.
    ///
    /// Returns an error only when the initial subscription fails.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut events = self.source.subscribe(&self.namespace).await?;
        info!(namespace = %self.namespace, "Watching warning events");

        loop {
            let mut delivered = false;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Event watcher stopped");
                        return Ok(());
                    }
                    next = events.next() => match next {
                        Some(event) => {
                            delivered = true;
                            self.handle(&event);
                        }
                        None => break,
                    }
                }
            }

            if delivered {
                self.backoff.reset();
            }
            warn!(namespace = %self.namespace, "Event stream closed, reconnecting");

            events = loop {
                let delay = self.backoff.next_delay();
                debug!(delay_ms = delay.as_millis() as u64, "Waiting before resubscribe");

                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Event watcher stopped");
                        return Ok(());
                    }
                    () = tokio::time::sleep(delay) => {}
                }

                match self.source.subscribe(&self.namespace).await {
                    Ok(stream) => {
                        info!(namespace = %self.namespace, "Event stream re-established");
                        break stream;
                    }
                    Err(e) => warn!(error = %e, "Resubscribe failed"),
                }
            };
        }
    }

    fn handle(&self, event: &ClusterEvent) {
        if !event.is_warning() {
            return;
        }
        self.aggregator.append(format_warning(event));
    }
}

//! Timer loop that turns buffered warnings into remediation cycles.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::aggregator::ErrorAggregator;
use crate::health::FixerStats;
use crate::orchestrator::{RemediationAttempt, RemediationOrchestrator};

/// Ticks every poll interval and runs a cycle whenever the aggregator
/// releases a batch.
///
/// Cycles run on this task, so at most one is in flight. Cancellation is
/// only observed between cycles.
pub struct RemediationLoop {
    aggregator: Arc<ErrorAggregator>,
    orchestrator: Arc<RemediationOrchestrator>,
    stats: Arc<FixerStats>,
    poll_interval: Duration,
}

impl RemediationLoop {
    #[must_use]
    pub fn new(
        aggregator: Arc<ErrorAggregator>,
        orchestrator: Arc<RemediationOrchestrator>,
        stats: Arc<FixerStats>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            aggregator,
            orchestrator,
            stats,
            poll_interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.stats.set_ready(true);
        info!(
            poll_secs = self.poll_interval.as_secs(),
            "Remediation loop started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.tick(Instant::now()).await;
        }

        self.stats.set_ready(false);
        info!("Remediation loop stopped");
    }

    /// Run a cycle if a batch is due at `now`.
    ///
    /// The next debounce window opens when the cycle ends, so warnings raised
    /// by the fix's own rollout get a full window to settle.
    pub async fn tick(&self, now: Instant) -> Option<RemediationAttempt> {
        let errors = self.aggregator.drain_if_due(now)?;

        self.stats.cycle_started();
        let started = Instant::now();
        let attempt = self.orchestrator.run_cycle(errors).await;
        self.aggregator.mark_cycle_finished(now + started.elapsed());
        self.stats.record(&attempt.outcome);
        info!(outcome = attempt.outcome.label(), "Remediation cycle finished");
        Some(attempt)
    }
}

//! Rollout verification for an applied fix.
//!
//! Watches the updated Deployment for a bounded window and judges the rollout
//! by the last replica counts seen when the window closes. The window is not
//! cut short on the first healthy update: right after an update the old
//! ReplicaSet still reports its pods as ready.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cluster::{RolloutUpdate, WorkloadClient};

/// How a watched rollout ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutOutcome {
    /// The last observation had every desired replica ready
    Succeeded,
    /// The last observation was short of the desired replicas
    Failed,
    /// No status update arrived before the window closed
    TimedOut,
}

/// What the monitor saw during one rollout window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutReport {
    pub outcome: RolloutOutcome,
    /// Desired replicas in the last status update
    pub desired: Option<i32>,
    /// Ready replicas in the last status update
    pub ready: Option<i32>,
    pub updates_seen: usize,
    /// Messages of error events reported by the watch stream
    pub stream_errors: Vec<String>,
}

impl RolloutReport {
    fn unobserved(stream_errors: Vec<String>) -> Self {
        Self {
            outcome: RolloutOutcome::TimedOut,
            desired: None,
            ready: None,
            updates_seen: 0,
            stream_errors,
        }
    }

    /// `desired - ready` from the last status update.
    pub fn shortfall(&self) -> Option<i32> {
        Some(self.desired? - self.ready?)
    }

    /// One-line description of the final replica state.
    #[must_use]
    pub fn describe(&self, namespace: &str, name: &str) -> String {
        match (self.desired, self.ready) {
            (Some(desired), Some(ready)) => format!(
                "Deployment {namespace}/{name} has {ready} of {desired} desired replicas ready after the rollout window"
            ),
            _ => format!(
                "Deployment {namespace}/{name} reported no status during the rollout window"
            ),
        }
    }
}

/// Watches a Deployment after a fix was applied.
pub struct RolloutMonitor {
    workloads: Arc<dyn WorkloadClient>,
    timeout: Duration,
}

impl RolloutMonitor {
    #[must_use]
    pub fn new(workloads: Arc<dyn WorkloadClient>, timeout: Duration) -> Self {
        Self { workloads, timeout }
    }

    /// Watch `namespace/name` for the configured window.
    ///
    /// A watch that cannot be opened is reported as an unobserved rollout
    /// with the failure recorded as a stream error.
    pub async fn verify(&self, namespace: &str, name: &str) -> RolloutReport {
        let deadline = Instant::now() + self.timeout;
        info!(
            namespace,
            deployment = name,
            timeout_secs = self.timeout.as_secs(),
            "Watching rollout"
        );

        let report = match self
            .workloads
            .watch_rollout(namespace, name, self.timeout)
            .await
        {
            Ok(updates) => observe(updates, deadline).await,
            Err(e) => {
                warn!(error = %e, "Could not watch rollout");
                RolloutReport::unobserved(vec![format!("could not watch rollout: {e}")])
            }
        };

        info!(
            namespace,
            deployment = name,
            outcome = ?report.outcome,
            desired = ?report.desired,
            ready = ?report.ready,
            stream_errors = report.stream_errors.len(),
            "Rollout window closed"
        );
        report
    }
}

/// Consume rollout updates until the stream ends or `deadline` passes.
pub async fn observe(
    mut updates: BoxStream<'_, RolloutUpdate>,
    deadline: Instant,
) -> RolloutReport {
    let mut report = RolloutReport::unobserved(Vec::new());

    while let Ok(Some(update)) = tokio::time::timeout_at(deadline, updates.next()).await {
        match update {
            RolloutUpdate::Status { desired, ready } => {
                debug!(desired, ready, "Rollout status");
                report.desired = Some(desired);
                report.ready = Some(ready);
                report.updates_seen += 1;
            }
            RolloutUpdate::StreamError(message) => {
                debug!(message = %message, "Rollout watch error");
                report.stream_errors.push(message);
            }
        }
    }

    report.outcome = match report.shortfall() {
        None => RolloutOutcome::TimedOut,
        Some(0) => RolloutOutcome::Succeeded,
        Some(_) => RolloutOutcome::Failed,
    };
    report
}

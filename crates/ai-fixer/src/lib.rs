//! Closed-loop remediation for a single Kubernetes deployment.
//!
//! Warning events for a namespace are buffered, and once a debounce window
//! has passed the batch is sent together with the deployment's known-good
//! manifest to an inference service. The proposed manifest is applied, the
//! rollout is watched, and the result is either proposed as a pull request or
//! handed to a human over a phone call.
//!
//! ```text
//! EventWatcher -> ErrorAggregator -> RemediationLoop -> RemediationOrchestrator
//!     -> ManifestSource, FixGenerator, extract -> WorkloadClient -> RolloutMonitor
//!     -> EscalationDispatcher
//! ```

#![warn(clippy::pedantic)]

pub mod aggregator;
pub mod cluster;
pub mod config;
pub mod error;
pub mod escalation;
pub mod extract;
pub mod health;
pub mod inference;
pub mod manifest;
pub mod orchestrator;
pub mod rollout;
pub mod runner;
pub mod watcher;

pub use aggregator::ErrorAggregator;
pub use cluster::{
    ClusterEvent, EventSource, KubeEventSource, KubeWorkloads, RolloutUpdate, WorkloadClient,
};
pub use config::{FixerConfig, Timing};
pub use error::{FixerError, Result};
pub use escalation::{
    ChangeRequest, ChangeRequester, EscalationDispatcher, GitHubChangeRequester, GitHubSettings,
    HumanEscalation, HumanNotifier,
};
pub use extract::extract_fenced_block;
pub use health::FixerStats;
pub use inference::{FixGenerator, InferenceClient};
pub use manifest::{HttpManifestSource, ManifestSource};
pub use orchestrator::{
    Collaborators, CycleOutcome, CycleStage, RemediationAttempt, RemediationOrchestrator,
    TargetPolicy,
};
pub use rollout::{RolloutMonitor, RolloutOutcome, RolloutReport};
pub use runner::RemediationLoop;
pub use watcher::{Backoff, EventWatcher};

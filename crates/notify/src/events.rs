//! Escalation events that end up in front of a human.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels for escalations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Something needs attention but the workload may still be serving
    Warning,
    /// A concrete bad state exists and needs a human now
    Critical,
}

impl Severity {
    /// Get display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

/// Events that can trigger notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// An applied fix was watched and the deployment did not converge
    RolloutFailed {
        namespace: String,
        deployment: String,
        /// Error text gathered before and during the rollout
        report: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// An applied fix was watched but no status update was ever observed
    RolloutUnverified {
        namespace: String,
        deployment: String,
        report: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl NotifyEvent {
    /// Get a short title for this event type.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::RolloutFailed {
                namespace,
                deployment,
                ..
            } => format!("Rollout failed: {namespace}/{deployment}"),
            Self::RolloutUnverified {
                namespace,
                deployment,
                ..
            } => format!("Rollout unverified: {namespace}/{deployment}"),
        }
    }

    /// Get the severity for this event.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::RolloutFailed { .. } => Severity::Critical,
            Self::RolloutUnverified { .. } => Severity::Warning,
        }
    }

    /// The text a human should hear or read.
    #[must_use]
    pub fn report(&self) -> &str {
        match self {
            Self::RolloutFailed { report, .. } | Self::RolloutUnverified { report, .. } => report,
        }
    }
}

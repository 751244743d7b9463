//! Error taxonomy for the remediation pipeline.
//!
//! Every failure in a cycle lands in one of these buckets, and the bucket
//! decides what happens next: connectivity on the event stream is retried,
//! connectivity anywhere else aborts the cycle, extraction failures are
//! dropped silently, rollout failures page a human, escalation failures are
//! only logged.

use thiserror::Error;

/// Errors produced by the remediation pipeline.
#[derive(Debug, Error)]
pub enum FixerError {
    /// A call to the cluster or an HTTP collaborator did not complete
    #[error("{operation} failed: {details}")]
    Connectivity {
        operation: &'static str,
        details: String,
    },

    /// An HTTP collaborator answered with a non-success status
    #[error("{operation} returned HTTP {status}: {body}")]
    UnexpectedStatus {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// The inference response carried no fenced block
    #[error("no fenced block found in inference response")]
    FixNotFound,

    /// The extracted text is not a usable Deployment manifest
    #[error("extracted manifest is not a valid Deployment: {0}")]
    InvalidManifest(String),

    /// The manifest targets a deployment that does not exist
    #[error("deployment {namespace}/{name} not found, refusing to create it")]
    TargetNotFound { namespace: String, name: String },

    /// The manifest targets a deployment this instance does not manage
    #[error("manifest targets deployment {found} but this instance manages {expected}")]
    TargetMismatch { expected: String, found: String },

    /// The API server rejected the update
    #[error("update of deployment {namespace}/{name} rejected: {details}")]
    UpdateRejected {
        namespace: String,
        name: String,
        details: String,
    },

    /// Pushing the fix or opening the pull request failed
    #[error("change request failed: {0}")]
    ChangeRequest(String),

    /// Calling the operator failed
    #[error("human notification failed: {0}")]
    Notification(String),

    /// Invalid configuration at startup
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias for the pipeline.
pub type Result<T, E = FixerError> = std::result::Result<T, E>;

impl FixerError {
    pub(crate) fn connectivity(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Connectivity {
            operation,
            details: err.to_string(),
        }
    }

    /// Get error category as string
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connectivity { .. } | Self::UnexpectedStatus { .. } => "connectivity",
            Self::FixNotFound => "extraction",
            Self::InvalidManifest(_)
            | Self::TargetNotFound { .. }
            | Self::TargetMismatch { .. }
            | Self::UpdateRejected { .. } => "apply",
            Self::ChangeRequest(_) | Self::Notification(_) => "escalation",
            Self::Config(_) => "configuration",
        }
    }
}

impl From<notify::ChannelError> for FixerError {
    fn from(err: notify::ChannelError) -> Self {
        Self::Notification(err.to_string())
    }
}

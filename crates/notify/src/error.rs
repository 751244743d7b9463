//! Error types for notification delivery.

use thiserror::Error;

/// Why a notification did not reach anyone.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The request never got an answer
    #[error("notification request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The notification service answered with a non-success status
    #[error("notification service returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Nothing to deliver through
    #[error("notification channel not configured: {0}")]
    NotConfigured(String),

    /// The channel accepted the request but could not deliver it
    #[error("notification not delivered: {0}")]
    Undelivered(String),
}

use std::time::Duration;

use thiserror::Error;

/// Error type returned by subscriber handlers and middleware.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// Emitted names must be concrete topics.
    #[error("invalid event name '{name}': {reason}")]
    InvalidEventName { name: String, reason: &'static str },

    /// Rejected by [`validate_pattern`](super::topic::validate_pattern).
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },

    #[error("subscription pattern cannot be empty")]
    EmptyPattern,

    /// No reply arrived on the private reply topic in time.
    #[error("request '{topic}' timed out after {timeout:?}")]
    RequestTimeout { topic: String, timeout: Duration },

    /// The reply subscription was torn down (for example by `reset`)
    /// before any reply was delivered.
    #[error("request '{topic}' was cancelled before a reply arrived")]
    RequestCancelled { topic: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BusError {
    pub(crate) fn invalid_name(name: &str, reason: &'static str) -> Self {
        BusError::InvalidEventName {
            name: name.to_string(),
            reason,
        }
    }

    /// Check if this error is a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BusError::RequestTimeout { .. })
    }
}

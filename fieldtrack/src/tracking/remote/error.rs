//! Error types for the remote tracking service.

use thiserror::Error;

/// Errors that can occur when talking to the remote tracking service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// The configured base URL cannot be used.
    #[error("Invalid service URL: {0}")]
    InvalidUrl(String),

    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// The service answered with a non-success status.
    #[error("Tracking service returned HTTP {status}")]
    Status { status: u16 },

    /// The bearer credential was missing or rejected.
    #[error("Not authorized (HTTP {status})")]
    Unauthorized { status: u16 },

    /// JSON (de)serialization failed.
    #[error("Failed to parse response: {0}")]
    JsonError(String),

    /// The call did not complete within its deadline.
    #[error("Request timed out")]
    Timeout,

    /// The push channel connection has been closed.
    #[error("Channel closed")]
    ChannelClosed,
}

impl RemoteError {
    /// True for failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::Timeout => true,
            Self::Status { status } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Timeout.is_transient());
        assert!(RemoteError::Status { status: 503 }.is_transient());
        assert!(RemoteError::Status { status: 429 }.is_transient());
        assert!(!RemoteError::Status { status: 404 }.is_transient());
        assert!(!RemoteError::Unauthorized { status: 401 }.is_transient());
    }
}

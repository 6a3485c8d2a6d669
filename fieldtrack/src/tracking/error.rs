//! Error types surfaced by tracking sessions.
//!
//! Position and remote failures each have their own error type in their
//! modules; [`TrackingError`] is what lifecycle operations (`start`, `stop`,
//! `join`, `leave`) return to callers.

use thiserror::Error;

use super::remote::RemoteError;
use super::source::{PositionError, PositionErrorKind};
use super::state::SessionState;

/// Errors returned by session lifecycle operations.
#[derive(Debug, Clone, Error)]
pub enum TrackingError {
    /// The user (or platform policy) refused access to location.
    #[error("Location permission denied: {0}")]
    PermissionDenied(String),

    /// No positioning hardware or platform support.
    #[error("Location unavailable: {0}")]
    Unavailable(String),

    /// A position fix or remote call did not complete in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The remote tracking service could not be reached or rejected the call.
    #[error("Remote tracking service error: {0}")]
    Network(#[from] RemoteError),

    /// Malformed input such as an out-of-range coordinate.
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// Another lifecycle operation is in flight for this session.
    #[error("Another start/stop operation is already in progress")]
    Busy,

    /// The operation is not allowed in the current session state.
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

impl From<PositionError> for TrackingError {
    fn from(e: PositionError) -> Self {
        match e.kind {
            PositionErrorKind::PermissionDenied => TrackingError::PermissionDenied(e.message),
            PositionErrorKind::Unavailable => TrackingError::Unavailable(e.message),
            PositionErrorKind::Timeout => TrackingError::Timeout(e.message),
        }
    }
}

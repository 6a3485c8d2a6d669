//! Position source - uniform async interface over a platform position feed.
//!
//! A [`PositionSource`] offers a one-shot fix ([`PositionSource::current_position`])
//! and a continuous watch ([`PositionSource::watch_position`]). Watch deliveries
//! arrive as [`WatchEvent`] messages on an mpsc channel, so the platform side
//! never waits on network work done by the consumer.
//!
//! Platform error codes are normalized to three kinds with
//! [`PositionErrorKind::from_platform_code`].
//!
//! # Implementations
//!
//! - [`SimulatedSource`] - replays a route at a fixed interval

mod simulated;

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use super::state::PositionSample;

pub use simulated::{SimulatedSource, SimulatedSourceConfig};

/// Platform code for "permission denied".
pub const PLATFORM_PERMISSION_DENIED: u16 = 1;

/// Platform code for "position unavailable".
pub const PLATFORM_POSITION_UNAVAILABLE: u16 = 2;

/// Platform code for "timeout".
pub const PLATFORM_TIMEOUT: u16 = 3;

/// Normalized position failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionErrorKind {
    /// Access to location was refused.
    PermissionDenied,
    /// No hardware, no support, or no fix could be computed.
    Unavailable,
    /// The platform did not produce a fix in time.
    Timeout,
}

impl PositionErrorKind {
    /// Map a platform error code onto a kind.
    ///
    /// Unknown codes are reported as `Unavailable`.
    pub fn from_platform_code(code: u16) -> Self {
        match code {
            PLATFORM_PERMISSION_DENIED => Self::PermissionDenied,
            PLATFORM_TIMEOUT => Self::Timeout,
            _ => Self::Unavailable,
        }
    }

    /// True if tracking cannot continue after this error.
    pub fn is_fatal(self) -> bool {
        self == Self::PermissionDenied
    }
}

impl std::fmt::Display for PositionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::Unavailable => write!(f, "position unavailable"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// A failure reported by a position source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PositionError {
    /// Normalized kind.
    pub kind: PositionErrorKind,
    /// Platform-provided detail.
    pub message: String,
}

impl PositionError {
    /// Create an error of the given kind.
    pub fn new(kind: PositionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create an error from a raw platform code.
    pub fn from_platform(code: u16, message: impl Into<String>) -> Self {
        Self::new(PositionErrorKind::from_platform_code(code), message)
    }
}

/// A message delivered by an active watch.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// A new fix.
    Sample(PositionSample),
    /// A watch error. The watch stays registered until stopped.
    Error(PositionError),
}

/// Opaque handle identifying a registered watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(pub u64);

/// Trait for platform position feeds.
pub trait PositionSource: Send + Sync {
    /// Obtain a single fix, failing after `timeout`.
    fn current_position(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<PositionSample, PositionError>> + Send;

    /// Start continuous delivery into `events`.
    ///
    /// Implementations must not block when the channel is full; a dropped
    /// sample is preferable to stalling the platform feed.
    fn watch_position(&self, events: mpsc::Sender<WatchEvent>) -> Result<WatchHandle, PositionError>;

    /// Stop delivery for `handle`. Unknown handles are ignored.
    fn stop_watch(&self, handle: WatchHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_code_mapping() {
        assert_eq!(
            PositionErrorKind::from_platform_code(1),
            PositionErrorKind::PermissionDenied
        );
        assert_eq!(
            PositionErrorKind::from_platform_code(2),
            PositionErrorKind::Unavailable
        );
        assert_eq!(
            PositionErrorKind::from_platform_code(3),
            PositionErrorKind::Timeout
        );
        assert_eq!(
            PositionErrorKind::from_platform_code(42),
            PositionErrorKind::Unavailable
        );
    }

    #[test]
    fn test_only_permission_denied_is_fatal() {
        assert!(PositionErrorKind::PermissionDenied.is_fatal());
        assert!(!PositionErrorKind::Unavailable.is_fatal());
        assert!(!PositionErrorKind::Timeout.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = PositionError::from_platform(3, "no satellites");
        assert_eq!(err.to_string(), "timeout: no satellites");
    }
}

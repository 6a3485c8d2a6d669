//! Core state types for tracking sessions.
//!
//! - [`PositionSample`] - One captured fix with accuracy and capture time
//! - [`Role`] - Provider (publishes position) or Observer (consumes it)
//! - [`SessionState`] - Lifecycle state owned by the coordinator
//! - [`TrackingSession`] - Mutable per-session bookkeeping
//! - [`SessionSnapshot`] - Read-only copy handed to callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::gate::EmitWindow;
use super::geo::Coordinate;

/// Accuracy (meters) above which a fix is considered low confidence.
///
/// Informational only: the update gate never rejects on accuracy.
pub const LOW_CONFIDENCE_ACCURACY_M: f64 = 100.0;

/// A single captured position reading.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSample {
    /// Where the device was.
    pub coordinate: Coordinate,

    /// Reported accuracy radius in meters.
    ///
    /// `None` when the platform did not report one. Negative values are
    /// treated as unreliable.
    pub accuracy: Option<f64>,

    /// When the platform captured the fix.
    pub captured_at: DateTime<Utc>,
}

impl PositionSample {
    /// Create a sample captured at the given time.
    pub fn new(coordinate: Coordinate, accuracy: Option<f64>, captured_at: DateTime<Utc>) -> Self {
        Self {
            coordinate,
            accuracy,
            captured_at,
        }
    }

    /// Create a sample captured now.
    pub fn now(coordinate: Coordinate, accuracy: Option<f64>) -> Self {
        Self::new(coordinate, accuracy, Utc::now())
    }

    /// Accuracy in meters, if reported and usable.
    pub fn accuracy_meters(&self) -> Option<f64> {
        self.accuracy.filter(|a| a.is_finite() && *a >= 0.0)
    }

    /// True if accuracy is missing, unusable, or coarser than
    /// [`LOW_CONFIDENCE_ACCURACY_M`].
    pub fn is_low_confidence(&self) -> bool {
        self.accuracy_meters()
            .map_or(true, |a| a > LOW_CONFIDENCE_ACCURACY_M)
    }
}

/// Which side of a tracking session this client plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Publishes its own position (the service provider en route).
    Provider,
    /// Watches the provider's position (the customer).
    Observer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provider => write!(f, "provider"),
            Self::Observer => write!(f, "observer"),
        }
    }
}

/// Lifecycle state of a provider session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session.
    #[default]
    Idle,
    /// Acquiring the initial fix and registering with the remote service.
    Starting,
    /// Watching position and emitting updates.
    Active,
    /// Tearing down the watch, heartbeat and remote session.
    Stopping,
    /// The position source failed unrecoverably. `start()` may be retried.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Active => write!(f, "Active"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Bookkeeping for one continuous tracking activity.
///
/// Created when `start()` succeeds and discarded on `stop()` or a fatal
/// position error. Only the coordinator mutates it.
#[derive(Debug, Clone)]
pub struct TrackingSession {
    /// Booking/job identifier.
    pub session_id: String,

    /// Role of this client.
    pub role: Role,

    /// Last sample forwarded to the remote service.
    pub last_emitted: Option<PositionSample>,

    /// When `last_emitted` was forwarded.
    pub last_emitted_at: Option<DateTime<Utc>>,

    /// Number of accepted watch samples (the initial fix is not counted).
    pub emit_count: u64,

    /// Capture time of the newest sample seen, accepted or not.
    pub last_seen_at: Option<DateTime<Utc>>,

    /// Recent emit times for the rate-limit rule.
    pub window: EmitWindow,
}

impl TrackingSession {
    /// Begin a session from the fix that was registered with the remote service.
    pub fn begin(
        session_id: impl Into<String>,
        role: Role,
        initial: PositionSample,
        now: DateTime<Utc>,
        window: EmitWindow,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            role,
            last_seen_at: Some(initial.captured_at),
            last_emitted: Some(initial),
            last_emitted_at: Some(now),
            emit_count: 0,
            window,
        }
    }

    /// True if `sample` was captured no later than the newest sample seen.
    pub fn is_stale(&self, sample: &PositionSample) -> bool {
        self.last_seen_at
            .is_some_and(|seen| sample.captured_at <= seen)
    }

    /// Record a sample the gate accepted.
    pub fn record_emit(&mut self, sample: PositionSample, now: DateTime<Utc>) {
        self.window.record(now);
        self.last_emitted = Some(sample);
        self.last_emitted_at = Some(now);
        self.emit_count += 1;
    }
}

/// Read-only view of a coordinator's session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Session identifier the coordinator is bound to.
    pub session_id: String,

    /// Current lifecycle state.
    pub state: SessionState,

    /// Last forwarded sample (None when no session is live).
    pub last_emitted: Option<PositionSample>,

    /// When the last sample was forwarded.
    pub last_emitted_at: Option<DateTime<Utc>>,

    /// Accepted watch samples in this session.
    pub emit_count: u64,
}

//! Update gate - decides whether a raw position is worth sending.
//!
//! The gate is a pure decision function over the previous emission, the
//! candidate sample and an [`UpdatePolicy`]. Rules are evaluated in order and
//! the first failing rule rejects:
//!
//! 1. No previous emission → accept (first fix always goes out)
//! 2. Less than `min_interval` since the previous emission → [`GateDecision::TooSoon`]
//! 3. Moved less than `min_distance_meters` → [`GateDecision::TooClose`]
//! 4. `max_emits_per_window` already reached → [`GateDecision::RateLimited`]
//! 5. Otherwise accept
//!
//! Accuracy is never a rejection reason. Low-confidence fixes still go
//! through the time, distance and rate rules.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::geo::distance_meters;
use super::state::PositionSample;

/// Default minimum time between emitted updates.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(5);

/// Default minimum movement between emitted updates.
pub const DEFAULT_MIN_DISTANCE_M: f64 = 10.0;

/// Default cap on emits per rate window.
pub const DEFAULT_MAX_EMITS_PER_WINDOW: u32 = 12;

/// Default rate window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Emission policy, fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePolicy {
    /// Minimum time between two emitted updates.
    pub min_interval: Duration,

    /// Minimum great-circle movement between two emitted updates.
    pub min_distance_meters: f64,

    /// Maximum emitted updates inside one sliding `window`.
    pub max_emits_per_window: u32,

    /// Sliding window length for `max_emits_per_window`.
    pub window: Duration,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            min_distance_meters: DEFAULT_MIN_DISTANCE_M,
            max_emits_per_window: DEFAULT_MAX_EMITS_PER_WINDOW,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Outcome of evaluating a candidate sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Forward the sample.
    Accept,
    /// Rejected by the minimum interval rule.
    TooSoon,
    /// Rejected by the minimum distance rule.
    TooClose,
    /// Rejected by the sliding-window rate limit.
    RateLimited,
}

impl GateDecision {
    /// Returns true for [`GateDecision::Accept`].
    pub fn is_accept(self) -> bool {
        self == GateDecision::Accept
    }
}

impl std::fmt::Display for GateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::TooSoon => write!(f, "too soon"),
            Self::TooClose => write!(f, "too close"),
            Self::RateLimited => write!(f, "rate limited"),
        }
    }
}

/// Evaluate the gate rules and report which one decided.
pub fn evaluate(
    previous: Option<&PositionSample>,
    previous_emitted_at: Option<DateTime<Utc>>,
    candidate: &PositionSample,
    now: DateTime<Utc>,
    policy: &UpdatePolicy,
    emits_in_window: u32,
) -> GateDecision {
    let Some(previous) = previous else {
        return GateDecision::Accept;
    };

    if let Some(emitted_at) = previous_emitted_at {
        // A clock that went backwards counts as no time elapsed
        let elapsed = (now - emitted_at).to_std().unwrap_or(Duration::ZERO);
        if elapsed < policy.min_interval {
            return GateDecision::TooSoon;
        }
    }

    if distance_meters(previous.coordinate, candidate.coordinate) < policy.min_distance_meters {
        return GateDecision::TooClose;
    }

    if emits_in_window >= policy.max_emits_per_window {
        return GateDecision::RateLimited;
    }

    GateDecision::Accept
}

/// Returns true if the candidate should be forwarded.
pub fn should_emit(
    previous: Option<&PositionSample>,
    previous_emitted_at: Option<DateTime<Utc>>,
    candidate: &PositionSample,
    now: DateTime<Utc>,
    policy: &UpdatePolicy,
    emits_in_window: u32,
) -> bool {
    evaluate(
        previous,
        previous_emitted_at,
        candidate,
        now,
        policy,
        emits_in_window,
    )
    .is_accept()
}

/// Sliding-window record of emit times.
#[derive(Debug, Clone)]
pub struct EmitWindow {
    window: Duration,
    emits: VecDeque<DateTime<Utc>>,
}

impl EmitWindow {
    /// Create an empty window of the given length.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            emits: VecDeque::new(),
        }
    }

    /// Record an emit at `now`.
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.prune(now);
        self.emits.push_back(now);
    }

    /// Number of emits within the window ending at `now`.
    pub fn count(&mut self, now: DateTime<Utc>) -> u32 {
        self.prune(now);
        self.emits.len().min(u32::MAX as usize) as u32
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        while let Some(oldest) = self.emits.front() {
            let age = (now - *oldest).to_std().unwrap_or(Duration::ZERO);
            if age >= self.window {
                self.emits.pop_front();
            } else {
                break;
            }
        }
    }
}

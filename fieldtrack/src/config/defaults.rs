//! Default values and constants for all configuration settings.
//!
//! Contains all `DEFAULT_*` constants and the `ConfigFile::default()`
//! implementation. Tracking defaults come from the tracking module so the
//! library and the config file never disagree.

use super::file::config_directory;
use super::settings::*;
use crate::tracking::coordinator::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_INITIAL_FIX_TIMEOUT, DEFAULT_MAX_CONSECUTIVE_WATCH_ERRORS,
};
use crate::tracking::gate::{
    DEFAULT_MAX_EMITS_PER_WINDOW, DEFAULT_MIN_DISTANCE_M, DEFAULT_MIN_INTERVAL, DEFAULT_WINDOW,
};
use crate::tracking::observer::DEFAULT_STATUS_POLL_INTERVAL;
use crate::tracking::remote::{DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT_SECS};

// =============================================================================
// [policy]
// =============================================================================

/// Default minimum interval between emits (5 seconds).
pub const DEFAULT_MIN_INTERVAL_MS: u64 = DEFAULT_MIN_INTERVAL.as_millis() as u64;

/// Default minimum movement between emits (10 meters).
pub const DEFAULT_MIN_DISTANCE_METERS: f64 = DEFAULT_MIN_DISTANCE_M;

/// Default rate window (60 seconds).
pub const DEFAULT_WINDOW_MS: u64 = DEFAULT_WINDOW.as_millis() as u64;

// =============================================================================
// [session]
// =============================================================================

/// Default initial fix deadline (10 seconds).
pub const DEFAULT_INITIAL_FIX_TIMEOUT_MS: u64 = DEFAULT_INITIAL_FIX_TIMEOUT.as_millis() as u64;

/// Default heartbeat period (30 seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = DEFAULT_HEARTBEAT_INTERVAL.as_secs();

/// Default observer status poll period (15 seconds).
pub const DEFAULT_STATUS_POLL_INTERVAL_SECS: u64 = DEFAULT_STATUS_POLL_INTERVAL.as_secs();

// =============================================================================
// [logging]
// =============================================================================

/// Default log file name.
pub const DEFAULT_LOG_FILE_NAME: &str = "fieldtrack.log";

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            remote: RemoteSettings {
                base_url: DEFAULT_BASE_URL.to_string(),
                bearer_token: None,
                request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            },
            policy: PolicySettings {
                min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
                min_distance_m: DEFAULT_MIN_DISTANCE_METERS,
                max_emits_per_window: DEFAULT_MAX_EMITS_PER_WINDOW,
                window_ms: DEFAULT_WINDOW_MS,
            },
            session: SessionSettings {
                initial_fix_timeout_ms: DEFAULT_INITIAL_FIX_TIMEOUT_MS,
                heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
                max_consecutive_watch_errors: DEFAULT_MAX_CONSECUTIVE_WATCH_ERRORS,
                status_poll_interval_secs: DEFAULT_STATUS_POLL_INTERVAL_SECS,
            },
            logging: LoggingSettings {
                file: config_directory().join("logs").join(DEFAULT_LOG_FILE_NAME),
            },
        }
    }
}

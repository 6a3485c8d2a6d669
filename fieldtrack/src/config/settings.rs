//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::path::PathBuf;

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    /// Tracking service connection
    pub remote: RemoteSettings,
    /// Update gate policy
    pub policy: PolicySettings,
    /// Session timing and error tolerance
    pub session: SessionSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Tracking service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSettings {
    /// API base URL; routes are appended as `/tracking/{id}/...`
    pub base_url: String,
    /// Bearer token for the tracking API
    pub bearer_token: Option<String>,
    /// Timeout in seconds for each request
    pub request_timeout_secs: u64,
}

/// Update gate configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySettings {
    /// Minimum milliseconds between emitted updates
    pub min_interval_ms: u64,
    /// Minimum movement in meters between emitted updates
    pub min_distance_m: f64,
    /// Maximum emitted updates per rate window
    pub max_emits_per_window: u32,
    /// Rate window length in milliseconds
    pub window_ms: u64,
}

/// Session timing configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Deadline for the initial fix in milliseconds
    pub initial_fix_timeout_ms: u64,
    /// Heartbeat period in seconds (0 = disabled)
    pub heartbeat_interval_secs: u64,
    /// Consecutive watch errors before the session fails
    pub max_consecutive_watch_errors: u32,
    /// Observer REST status poll period in seconds (0 = disabled)
    pub status_poll_interval_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Log file path
    pub file: PathBuf,
}

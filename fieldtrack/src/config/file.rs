//! Configuration file handling for ~/.fieldtrack/config.ini.
//!
//! Loads and saves user configuration with sensible defaults.
//! Settings structs live in [`super::settings`], constants in [`super::defaults`],
//! parsing in [`super::parser`], and serialization in [`super::writer`].

use ini::Ini;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use super::settings::*;

use crate::tracking::coordinator::{CoordinatorConfig, DEFAULT_EVENT_QUEUE_CAPACITY};
use crate::tracking::gate::UpdatePolicy;
use crate::tracking::observer::ObserverConfig;
use crate::tracking::remote::RemoteConfig;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Load configuration from the default path (~/.fieldtrack/config.ini).
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load() -> Result<Self, ConfigFileError> {
        let path = config_file_path();
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to the default path (~/.fieldtrack/config.ini).
    pub fn save(&self) -> Result<(), ConfigFileError> {
        let path = config_file_path();
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let content = super::writer::to_config_string(self);
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Create the default config file if it doesn't exist.
    ///
    /// Returns the path to the config file.
    pub fn ensure_exists() -> Result<PathBuf, ConfigFileError> {
        let path = config_file_path();
        if !path.exists() {
            Self::default().save_to(&path)?;
        }
        Ok(path)
    }

    /// Gate policy from `[policy]`.
    pub fn to_update_policy(&self) -> UpdatePolicy {
        UpdatePolicy {
            min_interval: Duration::from_millis(self.policy.min_interval_ms),
            min_distance_meters: self.policy.min_distance_m,
            max_emits_per_window: self.policy.max_emits_per_window,
            window: Duration::from_millis(self.policy.window_ms),
        }
    }

    /// Provider coordinator settings from `[policy]`, `[session]` and `[remote]`.
    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            policy: self.to_update_policy(),
            initial_fix_timeout: Duration::from_millis(self.session.initial_fix_timeout_ms),
            heartbeat_interval: Duration::from_secs(self.session.heartbeat_interval_secs),
            max_consecutive_watch_errors: self.session.max_consecutive_watch_errors,
            remote_timeout: Duration::from_secs(self.remote.request_timeout_secs),
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }

    /// Observer settings from `[session]` and `[remote]`.
    pub fn to_observer_config(&self) -> ObserverConfig {
        ObserverConfig {
            status_poll_interval: Duration::from_secs(self.session.status_poll_interval_secs),
            remote_timeout: Duration::from_secs(self.remote.request_timeout_secs),
            ..ObserverConfig::default()
        }
    }

    /// HTTP client settings from `[remote]`.
    pub fn to_remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            base_url: self.remote.base_url.clone(),
            bearer_token: self.remote.bearer_token.clone(),
            request_timeout: Duration::from_secs(self.remote.request_timeout_secs),
        }
    }
}

/// Get the path to the config directory (~/.fieldtrack).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fieldtrack")
}

/// Get the path to the config file (~/.fieldtrack/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

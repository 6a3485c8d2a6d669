//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization and the shared
//! tracking-service plumbing used by the command handlers.

use std::path::PathBuf;

use crate::error::CliError;
use fieldtrack::config::ConfigFile;
use fieldtrack::logging::{default_log_file, init_logging_full, LoggingGuard};
use fieldtrack::tracking::HttpRemoteChannel;
use tracing::info;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

impl CliRunner {
    /// Create a new CLI runner with optional debug logging.
    ///
    /// When stdout is a TTY, stdout logging is disabled so log lines do not
    /// interleave with the command's own progress output.
    ///
    /// # Arguments
    ///
    /// * `debug_mode` - When true, enables debug-level logging regardless of RUST_LOG
    pub fn with_debug(debug_mode: bool) -> Result<Self, CliError> {
        // Load config file (or use defaults if not present)
        let config = ConfigFile::load()?;

        let log_path = &config.logging.file;
        let log_dir = log_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let log_file = log_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| default_log_file().to_string());

        let stdout_enabled = !atty::is(atty::Stream::Stdout);

        let logging_guard = init_logging_full(&log_dir, &log_file, stdout_enabled, debug_mode)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("fieldtrack v{}", fieldtrack::VERSION);
        info!(
            command,
            config = %fieldtrack::config::config_file_path().display(),
            "fieldtrack CLI starting"
        );
    }

    /// Create the HTTP client for the configured tracking service.
    ///
    /// `token` overrides the configured bearer token when given.
    pub fn remote_channel(&self, token: Option<String>) -> Result<HttpRemoteChannel, CliError> {
        let mut remote_config = self.config.to_remote_config();
        if token.is_some() {
            remote_config.bearer_token = token;
        }

        info!(
            base_url = %remote_config.base_url,
            authenticated = remote_config.bearer_token.is_some(),
            "Connecting to tracking service"
        );
        HttpRemoteChannel::new(&remote_config).map_err(CliError::Remote)
    }
}

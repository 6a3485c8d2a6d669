//! User configuration for fieldtrack.
//!
//! Configuration lives in `~/.fieldtrack/config.ini` and is split by concern:
//!
//! - `[remote]` - tracking service URL, credential and request timeout
//! - `[policy]` - update gate thresholds
//! - `[session]` - initial fix deadline, heartbeat, error tolerance, status polling
//! - `[logging]` - log file location
//!
//! Missing keys fall back to defaults; invalid values are rejected with
//! [`ConfigFileError::InvalidValue`] naming the section and key.
//!
//! # Example
//!
//! ```ignore
//! use fieldtrack::config::ConfigFile;
//!
//! let config = ConfigFile::load()?;
//! let coordinator_config = config.to_coordinator_config();
//! let remote_config = config.to_remote_config();
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{ConfigFile, LoggingSettings, PolicySettings, RemoteSettings, SessionSettings};

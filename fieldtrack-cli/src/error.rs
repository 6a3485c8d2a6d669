//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;
use fieldtrack::config::ConfigFileError;
use fieldtrack::tracking::{RemoteError, TrackingError};

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Tracking session lifecycle failed
    Tracking(TrackingError),
    /// Remote tracking service call failed
    Remote(RemoteError),
    /// Bad command-line argument
    InvalidArgument(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        // Print additional help for specific errors
        match self {
            CliError::Tracking(TrackingError::Network(RemoteError::Unauthorized { .. }))
            | CliError::Remote(RemoteError::Unauthorized { .. }) => {
                eprintln!();
                eprintln!("The tracking service rejected the credential. Check that:");
                eprintln!("  1. bearer_token is set in the [remote] section of config.ini");
                eprintln!("  2. The token has not expired");
            }
            CliError::Tracking(TrackingError::Network(_)) | CliError::Remote(_) => {
                eprintln!();
                eprintln!("Could not talk to the tracking service. Check that:");
                eprintln!("  1. base_url in the [remote] section points at the API");
                eprintln!("  2. The service is reachable from this machine");
                eprintln!("  3. Try 'fieldtrack demo' to exercise a session without a server");
            }
            CliError::Tracking(TrackingError::Busy) => {
                eprintln!();
                eprintln!("Another start or stop is still running; wait for it to finish.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Tracking(e) => write!(f, "Tracking failed: {}", e),
            CliError::Remote(e) => write!(f, "Tracking service error: {}", e),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Tracking(e) => Some(e),
            CliError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<TrackingError> for CliError {
    fn from(e: TrackingError) -> Self {
        CliError::Tracking(e)
    }
}

impl From<RemoteError> for CliError {
    fn from(e: RemoteError) -> Self {
        CliError::Remote(e)
    }
}

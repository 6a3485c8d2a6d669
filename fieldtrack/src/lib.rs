//! fieldtrack - Live location tracking sessions for field service jobs
//!
//! This library turns a device's position feed into a throttled stream of
//! location updates for a remote tracking service, and lets a customer
//! follow that stream from the other side.
//!
//! # High-Level API
//!
//! The [`tracking`] module provides the provider and observer sessions:
//!
//! ```ignore
//! use fieldtrack::config::ConfigFile;
//! use fieldtrack::tracking::{HttpRemoteChannel, SessionCoordinator, SimulatedSource};
//!
//! let config = ConfigFile::load()?;
//! let remote = HttpRemoteChannel::new(&config.to_remote_config())?;
//! let coordinator =
//!     SessionCoordinator::new("job-42", source, remote, config.to_coordinator_config());
//!
//! coordinator.start().await?;
//! ```

pub mod config;
pub mod logging;
pub mod tracking;

/// Version of the fieldtrack library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

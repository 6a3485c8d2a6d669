//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`config`] - Configuration management (init, list, path)
//! - [`demo`] - Provider and observer sessions over an in-process hub
//! - [`distance`] - Great-circle distance and bearing between two points
//! - [`observe`] - Follow a provider's position through the REST status API
//! - [`provide`] - Run a provider session, replaying a route

pub mod common;
pub mod config;
pub mod demo;
pub mod distance;
pub mod observe;
pub mod provide;

//! Remote tracking service channels.
//!
//! The tracking service exposes a REST API for session lifecycle and status,
//! and a push channel that relays provider positions to observers.
//!
//! # Architecture
//!
//! ```text
//! SessionCoordinator (provider)          ObserverSession
//!     │                                      │
//!     └── RemoteChannel ──► service ◄── PushChannel + RemoteChannel (status poll)
//!             │
//!             ├── HttpRemoteChannel (reqwest, bearer auth)
//!             └── LoopbackHub (in-process, demo and tests)
//! ```
//!
//! Channels are injected into their consumers; nothing in this crate holds a
//! global connection.

mod client;
mod config;
mod error;
mod events;
mod loopback;

pub use client::{CredentialProvider, HttpRemoteChannel, PushChannel, RemoteChannel, StaticToken};
pub use config::{RemoteConfig, DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::RemoteError;
pub use events::{InboundEvent, LocationBody, OutboundEvent, TrackingStatus};
pub use loopback::{LoopbackConnection, LoopbackHub, LOOPBACK_STREAM_CAPACITY};

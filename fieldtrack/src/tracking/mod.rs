//! Location Tracking Module
//!
//! This module runs **live location tracking sessions** between a service
//! provider travelling to a job and the customer watching them arrive.
//!
//! # Architecture
//!
//! A provider-side [`SessionCoordinator`] turns a noisy, high-frequency
//! position feed into a throttled stream of updates for the remote tracking
//! service:
//!
//! - **Position Source** → one-shot fix and continuous watch, errors normalized
//! - **Update Gate** → first fix always, then min interval AND min distance AND rate cap
//! - **Remote Channel** → REST start/location/stop/status, push events to observers
//! - **Heartbeat** → re-sends the last emitted position while stationary
//!
//! An [`ObserverSession`] is the other end: it joins the push channel and
//! keeps the latest provider position, reconciling push and REST status by
//! timestamp.
//!
//! # Usage
//!
//! ```ignore
//! use fieldtrack::tracking::{
//!     CoordinatorConfig, HttpRemoteChannel, RemoteConfig, SessionCoordinator,
//!     SimulatedSource, SimulatedSourceConfig,
//! };
//!
//! let remote = HttpRemoteChannel::new(&RemoteConfig::new("https://api.example.com/api"))?;
//! let source = SimulatedSource::new(route, SimulatedSourceConfig::default())?;
//! let coordinator = SessionCoordinator::new("job-42", source, remote, CoordinatorConfig::default());
//!
//! let mut events = coordinator.subscribe();
//! coordinator.start().await?;
//! while let Ok(event) = events.recv().await {
//!     // Handle TrackingEvent
//! }
//! coordinator.stop().await?;
//! ```
//!
//! # Components
//!
//! - [`geo`] - `Coordinate`, haversine distance and bearing
//! - [`state`] - `PositionSample`, `TrackingSession`, `SessionState`, `SessionSnapshot`
//! - [`gate`] - `UpdatePolicy` and the emit decision
//! - [`source`] - `PositionSource` trait and `SimulatedSource`
//! - [`remote`] - `RemoteChannel`/`PushChannel` traits, HTTP client, loopback hub
//! - [`coordinator`] - Provider state machine
//! - [`observer`] - Observer session and view reconciliation

pub mod coordinator;
mod error;
pub mod gate;
pub mod geo;
mod logger;
pub mod observer;
pub mod remote;
pub mod source;
pub mod state;

pub use coordinator::{CoordinatorConfig, SessionCoordinator, StopOutcome, TrackingEvent};
pub use error::TrackingError;
pub use gate::{evaluate, should_emit, EmitWindow, GateDecision, UpdatePolicy};
pub use geo::{bearing_degrees, distance_meters, Coordinate, EARTH_RADIUS_M};
pub use logger::{spawn_session_logger, DEFAULT_LOG_INTERVAL};
pub use observer::{ObservedPosition, ObserverConfig, ObserverSession, ProviderPresence};
pub use remote::{
    CredentialProvider, HttpRemoteChannel, InboundEvent, LoopbackConnection, LoopbackHub,
    OutboundEvent, PushChannel, RemoteChannel, RemoteConfig, RemoteError, StaticToken,
    TrackingStatus,
};
pub use source::{
    PositionError, PositionErrorKind, PositionSource, SimulatedSource, SimulatedSourceConfig,
    WatchEvent, WatchHandle,
};
pub use state::{PositionSample, Role, SessionSnapshot, SessionState, TrackingSession};

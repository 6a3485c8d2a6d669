//! Observer session - consumes a provider's position without a local source.
//!
//! An [`ObserverSession`] joins the push channel as an observer and keeps
//! an [`ObservedPosition`] current from inbound events. Observer data is not
//! gated; it is only ordered: an update older than the current view is
//! dropped.
//!
//! When `status_poll_interval` is non-zero a REST fallback polls
//! `GET /tracking/{id}/status`. Push and poll data reconcile by timestamp, so
//! whichever carries the newer position wins.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::coordinator::ActiveTasks;
use super::error::TrackingError;
use super::geo::Coordinate;
use super::remote::{InboundEvent, PushChannel, RemoteChannel, RemoteError, TrackingStatus};
use super::state::{Role, SessionState};

/// Default REST status poll period.
pub const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Maximum backoff between failed status polls (5 minutes).
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// What the observer knows about the provider's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderPresence {
    /// Nothing heard yet.
    #[default]
    Unknown,
    /// Tracking is live.
    Active,
    /// The provider ended tracking.
    Stopped,
    /// The provider's connection dropped.
    Offline,
}

impl std::fmt::Display for ProviderPresence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Active => write!(f, "active"),
            Self::Stopped => write!(f, "stopped"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// The observer's current knowledge of the provider's position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservedPosition {
    /// Last known provider position.
    pub location: Option<Coordinate>,

    /// Service timestamp of `location`, when known.
    pub updated_at: Option<DateTime<Utc>>,

    /// Provider connection state.
    pub provider: ProviderPresence,
}

impl ObservedPosition {
    /// Fold a push event into the view. Returns true if the view changed.
    pub fn apply_event(&mut self, event: &InboundEvent) -> bool {
        let before = self.clone();

        match event {
            InboundEvent::LocationReceived {
                latitude,
                longitude,
                timestamp,
                ..
            } => {
                let location = Coordinate {
                    latitude: *latitude,
                    longitude: *longitude,
                };
                if location.is_valid() && self.is_newer(*timestamp) {
                    self.location = Some(location);
                    self.updated_at = Some(*timestamp);
                    self.provider = ProviderPresence::Active;
                }
            }
            InboundEvent::TrackingStarted {
                initial_location, ..
            } => {
                // A new provider session restarts ordering
                self.location = Some(*initial_location);
                self.updated_at = None;
                self.provider = ProviderPresence::Active;
            }
            InboundEvent::TrackingStopped { .. } => {
                self.provider = ProviderPresence::Stopped;
            }
            InboundEvent::ProviderOffline { .. } => {
                self.provider = ProviderPresence::Offline;
            }
        }

        *self != before
    }

    /// Fold a REST status into the view. Returns true if the view changed.
    pub fn apply_status(&mut self, status: &TrackingStatus) -> bool {
        let before = self.clone();

        let newer = match (status.current_location, status.last_update_timestamp) {
            (Some(location), Some(at)) if self.is_newer(at) => {
                self.location = Some(location);
                self.updated_at = Some(at);
                true
            }
            (Some(location), None) if self.location.is_none() => {
                self.location = Some(location);
                false
            }
            _ => false,
        };

        if newer {
            // A newer status is authoritative for presence too
            self.provider = if status.is_active {
                ProviderPresence::Active
            } else {
                ProviderPresence::Stopped
            };
        } else {
            match (status.is_active, self.provider) {
                (true, ProviderPresence::Unknown) => self.provider = ProviderPresence::Active,
                (false, ProviderPresence::Active) => self.provider = ProviderPresence::Stopped,
                _ => {}
            }
        }

        *self != before
    }

    fn is_newer(&self, at: DateTime<Utc>) -> bool {
        self.updated_at.map_or(true, |current| at > current)
    }
}

/// Observer configuration.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// REST status poll period. Zero disables polling.
    pub status_poll_interval: Duration,

    /// Deadline for each remote call.
    pub remote_timeout: Duration,

    /// Capacity of the view-change broadcast.
    pub event_queue_capacity: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            status_poll_interval: DEFAULT_STATUS_POLL_INTERVAL,
            remote_timeout: Duration::from_secs(10),
            event_queue_capacity: 64,
        }
    }
}

struct Shared<P, R> {
    push: P,
    remote: R,
    config: ObserverConfig,
    session_id: String,
    participant_id: String,
    view: RwLock<ObservedPosition>,
    changes: broadcast::Sender<ObservedPosition>,
}

impl<P, R> Shared<P, R> {
    fn view(&self) -> ObservedPosition {
        self.view.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Apply `f` to the view and broadcast the result if it changed.
    fn update(&self, f: impl FnOnce(&mut ObservedPosition) -> bool) {
        let changed = {
            let mut view = self.view.write().unwrap_or_else(|e| e.into_inner());
            f(&mut view).then(|| view.clone())
        };

        if let Some(view) = changed {
            debug!(
                session_id = %self.session_id,
                provider = %view.provider,
                location = ?view.location,
                "Observed position changed"
            );
            let _ = self.changes.send(view);
        }
    }
}

impl<P, R: RemoteChannel> Shared<P, R> {
    async fn fetch_status(&self) -> Result<TrackingStatus, RemoteError> {
        tokio::time::timeout(
            self.config.remote_timeout,
            self.remote.fetch_status(&self.session_id),
        )
        .await
        .map_err(|_| RemoteError::Timeout)?
    }
}

/// Observer-role session for one booking/job identifier.
pub struct ObserverSession<P, R> {
    shared: Arc<Shared<P, R>>,
    tasks: tokio::sync::Mutex<Option<ActiveTasks>>,
}

impl<P, R> ObserverSession<P, R>
where
    P: PushChannel + 'static,
    R: RemoteChannel + 'static,
{
    /// Create a session that has not joined yet.
    pub fn new(
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
        push: P,
        remote: R,
        config: ObserverConfig,
    ) -> Self {
        let (changes, _) = broadcast::channel(config.event_queue_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                push,
                remote,
                config,
                session_id: session_id.into(),
                participant_id: participant_id.into(),
                view: RwLock::new(ObservedPosition::default()),
                changes,
            }),
            tasks: tokio::sync::Mutex::new(None),
        }
    }

    /// Session identifier being observed.
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Current view of the provider.
    pub fn view(&self) -> ObservedPosition {
        self.shared.view()
    }

    /// Subscribe to view changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ObservedPosition> {
        self.shared.changes.subscribe()
    }

    /// Join the push channel and start following the provider.
    ///
    /// An initial status fetch seeds the view; its failure is logged, not
    /// returned, since push events will fill the view anyway.
    pub async fn join(&self) -> Result<ObservedPosition, TrackingError> {
        let mut tasks = self.tasks.try_lock().map_err(|_| TrackingError::Busy)?;
        if tasks.is_some() {
            return Err(TrackingError::InvalidState {
                operation: "join",
                state: SessionState::Active,
            });
        }

        let events = self
            .shared
            .push
            .join(
                &self.shared.session_id,
                Role::Observer,
                &self.shared.participant_id,
            )
            .await?;

        match self.shared.fetch_status().await {
            Ok(status) => self.shared.update(|view| view.apply_status(&status)),
            Err(e) => warn!(
                session_id = %self.shared.session_id,
                error = %e,
                "Initial status fetch failed"
            ),
        }

        let cancellation = CancellationToken::new();
        let mut handles = vec![tokio::spawn(run_event_stream(
            Arc::clone(&self.shared),
            events,
            cancellation.clone(),
        ))];

        let period = self.shared.config.status_poll_interval;
        if !period.is_zero() {
            handles.push(tokio::spawn(run_status_poll(
                Arc::clone(&self.shared),
                period,
                cancellation.clone(),
            )));
        }

        *tasks = Some(ActiveTasks::new(cancellation, handles));

        info!(
            session_id = %self.shared.session_id,
            participant_id = %self.shared.participant_id,
            poll_secs = period.as_secs(),
            "Observing tracking session"
        );
        Ok(self.view())
    }

    /// Stop following and leave the push channel.
    pub async fn leave(&self) -> Result<(), TrackingError> {
        let mut tasks = self.tasks.try_lock().map_err(|_| TrackingError::Busy)?;
        let Some(active) = tasks.take() else {
            return Err(TrackingError::InvalidState {
                operation: "leave",
                state: SessionState::Idle,
            });
        };

        active.shutdown().await;
        self.shared.push.leave(&self.shared.session_id).await?;

        info!(session_id = %self.shared.session_id, "Left tracking session");
        Ok(())
    }

    /// True between a successful `join()` and `leave()`.
    pub fn is_joined(&self) -> bool {
        self.tasks.try_lock().map_or(true, |tasks| tasks.is_some())
    }
}

/// Apply push events until cancelled or the stream closes.
async fn run_event_stream<P, R>(
    shared: Arc<Shared<P, R>>,
    mut events: mpsc::Receiver<InboundEvent>,
    cancellation: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            event = events.recv() => event,
        };

        let Some(event) = event else {
            warn!(session_id = %shared.session_id, "Push stream closed");
            break;
        };

        if event.session_id() != shared.session_id {
            trace!(
                session_id = %shared.session_id,
                other = event.session_id(),
                "Ignoring event for another session"
            );
            continue;
        }

        shared.update(|view| view.apply_event(&event));
    }
}

/// Poll the REST status endpoint, backing off after failures.
async fn run_status_poll<P, R: RemoteChannel>(
    shared: Arc<Shared<P, R>>,
    period: Duration,
    cancellation: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut consecutive_errors: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if consecutive_errors > 0 {
            let backoff = calculate_backoff(consecutive_errors);
            debug!(
                backoff_secs = backoff.as_secs(),
                consecutive_errors,
                "Backing off after status poll errors"
            );
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            result = shared.fetch_status() => result,
        };

        match result {
            Ok(status) => {
                consecutive_errors = 0;
                shared.update(|view| view.apply_status(&status));
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(
                    session_id = %shared.session_id,
                    error = %e,
                    consecutive_errors,
                    "Status poll failed"
                );
            }
        }
    }
}

/// Exponential backoff: 2^n seconds, capped at [`MAX_BACKOFF`].
fn calculate_backoff(consecutive_errors: u32) -> Duration {
    let secs = 2u64.saturating_pow(consecutive_errors.min(20));
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

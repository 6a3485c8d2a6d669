//! Session coordinator - provider-side tracking state machine.
//!
//! The [`SessionCoordinator`] owns one tracking session for one booking/job
//! identifier. It mediates between a [`PositionSource`], the update gate and
//! a [`RemoteChannel`]:
//!
//! ```text
//! PositionSource ──WatchEvent──► watch loop ──accepted──► uplink task ──► RemoteChannel
//!                                   │                        ▲
//!                                   │ stale / gate / errors  │ heartbeat tick
//!                                   ▼                        │
//!                          broadcast<TrackingEvent>     heartbeat task
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Idle/Failed ─start()─► Starting ─ok─► Active ─stop()─► Stopping ─► Idle
//!                            │             │
//!                            └─err─► Idle  └─fatal watch error─► Failed
//! ```
//!
//! Lifecycle operations are serialized: a `start()` or `stop()` issued while
//! another one is in flight fails with [`TrackingError::Busy`].
//!
//! # Thread Safety
//!
//! Session state lives behind an `RwLock` inside an `Arc`. Only coordinator
//! code paths (lifecycle operations and the watch loop) write it; the
//! heartbeat and uplink tasks only read.

use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::error::TrackingError;
use super::gate::{self, EmitWindow, GateDecision, UpdatePolicy};
use super::geo::Coordinate;
use super::remote::{RemoteChannel, RemoteError};
use super::source::{PositionError, PositionSource, WatchEvent, WatchHandle};
use super::state::{PositionSample, Role, SessionSnapshot, SessionState, TrackingSession};

/// Default timeout for the initial fix.
pub const DEFAULT_INITIAL_FIX_TIMEOUT: Duration = Duration::from_secs(10);

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of consecutive watch errors tolerated before failing.
pub const DEFAULT_MAX_CONSECUTIVE_WATCH_ERRORS: u32 = 3;

/// Default timeout for each remote call.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the watch, uplink and notification queues.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 64;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Gate policy applied to watch samples.
    pub policy: UpdatePolicy,

    /// Deadline for the initial fix during `start()`.
    pub initial_fix_timeout: Duration,

    /// Period of the heartbeat re-send. Zero disables the heartbeat.
    pub heartbeat_interval: Duration,

    /// Consecutive watch errors that move the session to `Failed`.
    pub max_consecutive_watch_errors: u32,

    /// Deadline for each remote call.
    pub remote_timeout: Duration,

    /// Capacity of internal queues.
    pub event_queue_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            policy: UpdatePolicy::default(),
            initial_fix_timeout: DEFAULT_INITIAL_FIX_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_consecutive_watch_errors: DEFAULT_MAX_CONSECUTIVE_WATCH_ERRORS,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

/// Notifications published by a coordinator.
#[derive(Debug, Clone)]
pub enum TrackingEvent {
    /// The session is active; `initial` was registered with the service.
    Started { initial: PositionSample },

    /// A sample passed the gate and was queued for the service.
    LocationEmitted {
        sample: PositionSample,
        emit_count: u64,
    },

    /// A sample was rejected by the gate. Not an error.
    SampleSuppressed {
        sample: PositionSample,
        decision: GateDecision,
    },

    /// A sample arrived out of order and was dropped.
    StaleSampleDiscarded { sample: PositionSample },

    /// The position watch reported an error.
    WatchError {
        error: PositionError,
        consecutive: u32,
    },

    /// The heartbeat re-sent the last emitted location.
    HeartbeatSent { location: Coordinate },

    /// A best-effort location update to the service failed.
    RemoteUpdateFailed { error: RemoteError },

    /// The session ended because of an unrecoverable position error.
    Failed { error: TrackingError },

    /// `stop()` completed.
    Stopped { remote_end_ok: bool },
}

/// Result of a successful `stop()`.
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// Local teardown and remote end-session both succeeded.
    Clean,
    /// Local teardown succeeded; the service did not acknowledge the end.
    RemoteEndFailed(RemoteError),
}

enum Uplink {
    Update(Coordinate),
    Heartbeat,
}

#[derive(Debug, Default)]
struct Inner {
    state: SessionState,
    session: Option<TrackingSession>,
}

struct Shared<S, R> {
    source: S,
    remote: R,
    config: CoordinatorConfig,
    session_id: String,
    inner: RwLock<Inner>,
    watch: Mutex<Option<WatchHandle>>,
    events: broadcast::Sender<TrackingEvent>,
}

/// Background tasks of an active session. Dropping cancels them.
pub(super) struct ActiveTasks {
    cancellation: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl ActiveTasks {
    pub(super) fn new(cancellation: CancellationToken, handles: Vec<JoinHandle<()>>) -> Self {
        Self {
            cancellation,
            handles,
        }
    }

    /// Cancel all tasks and wait for them to finish.
    pub(super) async fn shutdown(mut self) {
        self.cancellation.cancel();
        for handle in std::mem::take(&mut self.handles) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Tracking task ended abnormally");
            }
        }
    }
}

impl Drop for ActiveTasks {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

/// Provider-role tracking coordinator bound to one session identifier.
pub struct SessionCoordinator<S, R> {
    shared: Arc<Shared<S, R>>,
    lifecycle: tokio::sync::Mutex<Option<ActiveTasks>>,
}

impl<S, R> SessionCoordinator<S, R>
where
    S: PositionSource + 'static,
    R: RemoteChannel + 'static,
{
    /// Create an idle coordinator for `session_id`.
    pub fn new(
        session_id: impl Into<String>,
        source: S,
        remote: R,
        config: CoordinatorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_queue_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                source,
                remote,
                config,
                session_id: session_id.into(),
                inner: RwLock::new(Inner::default()),
                watch: Mutex::new(None),
                events,
            }),
            lifecycle: tokio::sync::Mutex::new(None),
        }
    }

    /// Session identifier this coordinator tracks.
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Snapshot of the session.
    pub fn status(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    /// Subscribe to session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.shared.events.subscribe()
    }

    /// The position source driving this coordinator.
    pub fn source(&self) -> &S {
        &self.shared.source
    }

    /// The remote channel this coordinator reports to.
    pub fn remote(&self) -> &R {
        &self.shared.remote
    }

    /// Begin tracking.
    ///
    /// Obtains an initial fix, registers the session with the service and
    /// starts the position watch. Permitted from `Idle` and `Failed`. On any
    /// failure the coordinator returns to `Idle` with no session retained.
    pub async fn start(&self) -> Result<SessionSnapshot, TrackingError> {
        let mut lifecycle = self.lifecycle.try_lock().map_err(|_| TrackingError::Busy)?;

        let state = self.state();
        if !matches!(state, SessionState::Idle | SessionState::Failed) {
            return Err(TrackingError::InvalidState {
                operation: "start",
                state,
            });
        }

        // Tasks left behind by a failed session have already been cancelled
        if let Some(tasks) = lifecycle.take() {
            tasks.shutdown().await;
        }

        self.shared.set_state(SessionState::Starting);
        info!(session_id = %self.shared.session_id, "Starting tracking session");

        let mut guard = StartGuard {
            shared: &self.shared,
            armed: true,
        };

        match Arc::clone(&self.shared).handshake().await {
            Ok((tasks, initial)) => {
                guard.armed = false;
                *lifecycle = Some(tasks);

                info!(
                    session_id = %self.shared.session_id,
                    location = %initial.coordinate,
                    accuracy = ?initial.accuracy,
                    "Tracking session active"
                );
                self.shared.emit(TrackingEvent::Started { initial });
                Ok(self.status())
            }
            Err(e) => {
                warn!(
                    session_id = %self.shared.session_id,
                    error = %e,
                    "Failed to start tracking session"
                );
                Err(e)
            }
        }
    }

    /// End tracking.
    ///
    /// Cancels the watch, heartbeat and pending uplink before asking the
    /// service to end the session. The coordinator is `Idle` afterwards even
    /// if the service call fails; that failure is reported as
    /// [`StopOutcome::RemoteEndFailed`].
    pub async fn stop(&self) -> Result<StopOutcome, TrackingError> {
        let mut lifecycle = self.lifecycle.try_lock().map_err(|_| TrackingError::Busy)?;

        {
            // fail() must not land between the check and the transition
            let mut inner = self.shared.write();
            if inner.state != SessionState::Active {
                return Err(TrackingError::InvalidState {
                    operation: "stop",
                    state: inner.state,
                });
            }
            inner.state = SessionState::Stopping;
        }
        info!(session_id = %self.shared.session_id, "Stopping tracking session");

        if let Some(tasks) = lifecycle.take() {
            tasks.shutdown().await;
        }
        self.shared.release_watch();

        let result = self
            .shared
            .remote_call(self.shared.remote.end_session(&self.shared.session_id))
            .await;

        {
            let mut inner = self.shared.write();
            inner.state = SessionState::Idle;
            inner.session = None;
        }

        let outcome = match result {
            Ok(()) => {
                info!(session_id = %self.shared.session_id, "Tracking session stopped");
                StopOutcome::Clean
            }
            Err(e) => {
                warn!(
                    session_id = %self.shared.session_id,
                    error = %e,
                    "Tracking session stopped locally; remote end-session failed"
                );
                StopOutcome::RemoteEndFailed(e)
            }
        };

        self.shared.emit(TrackingEvent::Stopped {
            remote_end_ok: outcome == StopOutcome::Clean,
        });
        Ok(outcome)
    }
}

/// Resets a start that did not complete (error or dropped future) to `Idle`.
struct StartGuard<'a, S: PositionSource, R> {
    shared: &'a Shared<S, R>,
    armed: bool,
}

impl<S: PositionSource, R> Drop for StartGuard<'_, S, R> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.release_watch();
            let mut inner = self.shared.write();
            inner.state = SessionState::Idle;
            inner.session = None;
        }
    }
}

impl<S: PositionSource, R> Shared<S, R> {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> SessionState {
        self.read().state
    }

    fn set_state(&self, state: SessionState) {
        self.write().state = state;
    }

    fn snapshot(&self) -> SessionSnapshot {
        let inner = self.read();
        let session = inner.session.as_ref();
        SessionSnapshot {
            session_id: self.session_id.clone(),
            state: inner.state,
            last_emitted: session.and_then(|s| s.last_emitted.clone()),
            last_emitted_at: session.and_then(|s| s.last_emitted_at),
            emit_count: session.map_or(0, |s| s.emit_count),
        }
    }

    fn last_emitted_location(&self) -> Option<Coordinate> {
        self.read()
            .session
            .as_ref()
            .and_then(|s| s.last_emitted.as_ref())
            .map(|s| s.coordinate)
    }

    fn emit(&self, event: TrackingEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Stop the platform watch if one is registered. Idempotent.
    fn release_watch(&self) {
        let handle = self.watch.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            self.source.stop_watch(handle);
            debug!(session_id = %self.session_id, handle = handle.0, "Position watch stopped");
        }
    }

    async fn remote_call<T>(
        &self,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        tokio::time::timeout(self.config.remote_timeout, call)
            .await
            .map_err(|_| RemoteError::Timeout)?
    }

    /// Gate one watch sample against the session.
    fn process_sample(&self, sample: PositionSample, uplink: &mpsc::Sender<Uplink>) {
        enum Outcome {
            Inactive,
            Invalid,
            Stale,
            Suppressed(GateDecision),
            Emitted(u64),
        }

        let now = Utc::now();
        let outcome = {
            let mut inner = self.write();
            if inner.state != SessionState::Active {
                Outcome::Inactive
            } else if let Some(session) = inner.session.as_mut() {
                if !sample.coordinate.is_valid() {
                    Outcome::Invalid
                } else if session.is_stale(&sample) {
                    Outcome::Stale
                } else {
                    session.last_seen_at = Some(sample.captured_at);
                    let in_window = session.window.count(now);
                    let decision = gate::evaluate(
                        session.last_emitted.as_ref(),
                        session.last_emitted_at,
                        &sample,
                        now,
                        &self.config.policy,
                        in_window,
                    );
                    if decision.is_accept() {
                        session.record_emit(sample.clone(), now);
                        Outcome::Emitted(session.emit_count)
                    } else {
                        Outcome::Suppressed(decision)
                    }
                }
            } else {
                Outcome::Inactive
            }
        };

        match outcome {
            Outcome::Inactive => {}
            Outcome::Invalid => {
                warn!(
                    session_id = %self.session_id,
                    latitude = sample.coordinate.latitude,
                    longitude = sample.coordinate.longitude,
                    "Discarding sample with invalid coordinate"
                );
            }
            Outcome::Stale => {
                trace!(
                    session_id = %self.session_id,
                    captured_at = %sample.captured_at,
                    "Discarding out-of-order sample"
                );
                self.emit(TrackingEvent::StaleSampleDiscarded { sample });
            }
            Outcome::Suppressed(decision) => {
                trace!(
                    session_id = %self.session_id,
                    %decision,
                    "Sample suppressed by gate"
                );
                self.emit(TrackingEvent::SampleSuppressed { sample, decision });
            }
            Outcome::Emitted(emit_count) => {
                debug!(
                    session_id = %self.session_id,
                    location = %sample.coordinate,
                    accuracy = ?sample.accuracy,
                    low_confidence = sample.is_low_confidence(),
                    emit_count,
                    "Location accepted"
                );
                if let Err(e) = uplink.try_send(Uplink::Update(sample.coordinate)) {
                    warn!(session_id = %self.session_id, error = %e, "Uplink queue rejected update");
                }
                self.emit(TrackingEvent::LocationEmitted { sample, emit_count });
            }
        }
    }

    /// Move an active session to `Failed`. No-op unless `Active`.
    fn fail(&self, error: TrackingError, cancellation: &CancellationToken) {
        {
            let mut inner = self.write();
            if inner.state != SessionState::Active {
                return;
            }
            inner.state = SessionState::Failed;
            inner.session = None;
        }

        cancellation.cancel();
        self.release_watch();

        error!(session_id = %self.session_id, error = %error, "Tracking session failed");
        self.emit(TrackingEvent::Failed { error });
    }
}

impl<S, R> Shared<S, R>
where
    S: PositionSource + 'static,
    R: RemoteChannel + 'static,
{
    /// Initial fix, remote registration and task spawn.
    async fn handshake(self: Arc<Self>) -> Result<(ActiveTasks, PositionSample), TrackingError> {
        let fix_timeout = self.config.initial_fix_timeout;
        let initial = tokio::time::timeout(fix_timeout, self.source.current_position(fix_timeout))
            .await
            .map_err(|_| {
                TrackingError::Timeout(format!(
                    "no initial fix within {}ms",
                    fix_timeout.as_millis()
                ))
            })??;

        if !initial.coordinate.is_valid() {
            return Err(TrackingError::Invalid(format!(
                "initial fix has invalid coordinate {}",
                initial.coordinate
            )));
        }

        self.remote_call(self.remote.begin_session(&self.session_id, initial.coordinate))
            .await?;

        let capacity = self.config.event_queue_capacity.max(1);
        let (watch_tx, watch_rx) = mpsc::channel(capacity);
        let handle = match self.source.watch_position(watch_tx) {
            Ok(handle) => handle,
            Err(e) => {
                // The service already knows the session; take it down again
                if let Err(end_err) = self.remote_call(self.remote.end_session(&self.session_id)).await {
                    warn!(
                        session_id = %self.session_id,
                        error = %end_err,
                        "Failed to end remote session after watch registration failed"
                    );
                }
                return Err(e.into());
            }
        };
        *self.watch.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        {
            let mut inner = self.write();
            inner.session = Some(TrackingSession::begin(
                self.session_id.clone(),
                Role::Provider,
                initial.clone(),
                Utc::now(),
                EmitWindow::new(self.config.policy.window),
            ));
            inner.state = SessionState::Active;
        }

        let cancellation = CancellationToken::new();
        let (uplink_tx, uplink_rx) = mpsc::channel(capacity);
        let mut handles = Vec::with_capacity(3);

        handles.push(tokio::spawn(run_uplink(
            Arc::clone(&self),
            uplink_rx,
            cancellation.clone(),
        )));

        if !self.config.heartbeat_interval.is_zero() {
            handles.push(tokio::spawn(run_heartbeat(
                self.config.heartbeat_interval,
                uplink_tx.clone(),
                cancellation.clone(),
            )));
        }

        handles.push(tokio::spawn(run_watch_loop(
            Arc::clone(&self),
            watch_rx,
            uplink_tx,
            cancellation.clone(),
        )));

        Ok((ActiveTasks::new(cancellation, handles), initial))
    }
}

/// Consume watch events until cancelled or the session fails.
async fn run_watch_loop<S, R>(
    shared: Arc<Shared<S, R>>,
    mut events: mpsc::Receiver<WatchEvent>,
    uplink: mpsc::Sender<Uplink>,
    cancellation: CancellationToken,
) where
    S: PositionSource,
    R: RemoteChannel,
{
    let max_errors = shared.config.max_consecutive_watch_errors.max(1);
    let mut consecutive_errors: u32 = 0;

    loop {
        let event = tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Some(WatchEvent::Sample(sample)) => {
                consecutive_errors = 0;
                shared.process_sample(sample, &uplink);
            }
            Some(WatchEvent::Error(error)) => {
                consecutive_errors += 1;
                warn!(
                    session_id = %shared.session_id,
                    error = %error,
                    consecutive_errors,
                    max_errors,
                    "Position watch error"
                );
                shared.emit(TrackingEvent::WatchError {
                    error: error.clone(),
                    consecutive: consecutive_errors,
                });

                if error.kind.is_fatal() || consecutive_errors >= max_errors {
                    shared.fail(error.into(), &cancellation);
                    break;
                }
            }
            None => {
                shared.fail(
                    TrackingError::Unavailable("position watch ended unexpectedly".to_string()),
                    &cancellation,
                );
                break;
            }
        }
    }

    shared.release_watch();
    trace!(session_id = %shared.session_id, "Watch loop exited");
}

/// Forward accepted locations and heartbeats to the service, in order.
async fn run_uplink<S, R>(
    shared: Arc<Shared<S, R>>,
    mut requests: mpsc::Receiver<Uplink>,
    cancellation: CancellationToken,
) where
    S: PositionSource,
    R: RemoteChannel,
{
    loop {
        let request = tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let (location, heartbeat) = match request {
            Uplink::Update(location) => (location, false),
            Uplink::Heartbeat => match shared.last_emitted_location() {
                Some(location) => (location, true),
                None => continue,
            },
        };

        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            result = shared.remote_call(shared.remote.update_location(&shared.session_id, location)) => result,
        };

        match result {
            Ok(()) if heartbeat => {
                debug!(session_id = %shared.session_id, %location, "Heartbeat sent");
                shared.emit(TrackingEvent::HeartbeatSent { location });
            }
            Ok(()) => {
                trace!(session_id = %shared.session_id, %location, "Location delivered");
            }
            Err(error) => {
                warn!(
                    session_id = %shared.session_id,
                    error = %error,
                    heartbeat,
                    "Location update failed"
                );
                shared.emit(TrackingEvent::RemoteUpdateFailed { error });
            }
        }
    }
}

/// Queue a heartbeat every `period` until cancelled.
async fn run_heartbeat(
    period: Duration,
    uplink: mpsc::Sender<Uplink>,
    cancellation: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if uplink.try_send(Uplink::Heartbeat).is_err() {
            trace!("Uplink busy, skipping heartbeat");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::remote::TrackingStatus;
    use crate::tracking::source::PositionErrorKind;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn coord(latitude: f64, longitude: f64) -> Coordinate {
        Coordinate {
            latitude,
            longitude,
        }
    }

    /// Source whose fix and watch deliveries are driven by the test.
    struct ScriptedSource {
        fix: Mutex<Result<PositionSample, PositionError>>,
        fix_delay: Duration,
        watch_result: Mutex<Option<PositionError>>,
        sender: Mutex<Option<mpsc::Sender<WatchEvent>>>,
        watch_calls: AtomicUsize,
        stop_calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn with_fix(fix: Result<PositionSample, PositionError>) -> Self {
            Self {
                fix: Mutex::new(fix),
                fix_delay: Duration::ZERO,
                watch_result: Mutex::new(None),
                sender: Mutex::new(None),
                watch_calls: AtomicUsize::new(0),
                stop_calls: AtomicUsize::new(0),
            }
        }

        fn new() -> Self {
            Self::with_fix(Ok(PositionSample::now(coord(28.6, 77.2), Some(5.0))))
        }

        async fn push(&self, event: WatchEvent) {
            let sender = self.sender.lock().unwrap().clone().expect("no active watch");
            sender.send(event).await.unwrap();
        }
    }

    impl PositionSource for ScriptedSource {
        async fn current_position(&self, _timeout: Duration) -> Result<PositionSample, PositionError> {
            if !self.fix_delay.is_zero() {
                tokio::time::sleep(self.fix_delay).await;
            }
            self.fix.lock().unwrap().clone()
        }

        fn watch_position(&self, events: mpsc::Sender<WatchEvent>) -> Result<WatchHandle, PositionError> {
            self.watch_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.watch_result.lock().unwrap().clone() {
                return Err(e);
            }
            *self.sender.lock().unwrap() = Some(events);
            Ok(WatchHandle(7))
        }

        fn stop_watch(&self, _handle: WatchHandle) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            self.sender.lock().unwrap().take();
        }
    }

    /// Remote channel counting calls.
    #[derive(Default)]
    struct MockRemote {
        begin_calls: AtomicUsize,
        end_calls: AtomicUsize,
        updates: Mutex<Vec<Coordinate>>,
        fail_begin: AtomicBool,
        fail_updates: AtomicBool,
        fail_end: AtomicBool,
        update_seen: Notify,
    }

    impl RemoteChannel for MockRemote {
        async fn begin_session(&self, _session_id: &str, _location: Coordinate) -> Result<(), RemoteError> {
            self.begin_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_begin.load(Ordering::SeqCst) {
                return Err(RemoteError::HttpError("connection refused".to_string()));
            }
            Ok(())
        }

        async fn update_location(&self, _session_id: &str, location: Coordinate) -> Result<(), RemoteError> {
            self.updates.lock().unwrap().push(location);
            self.update_seen.notify_one();
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(RemoteError::Status { status: 503 });
            }
            Ok(())
        }

        async fn end_session(&self, _session_id: &str) -> Result<(), RemoteError> {
            self.end_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_end.load(Ordering::SeqCst) {
                return Err(RemoteError::Timeout);
            }
            Ok(())
        }

        async fn fetch_status(&self, _session_id: &str) -> Result<TrackingStatus, RemoteError> {
            Ok(TrackingStatus::default())
        }
    }

    fn permissive_config() -> CoordinatorConfig {
        CoordinatorConfig {
            policy: UpdatePolicy {
                min_interval: Duration::ZERO,
                min_distance_meters: 0.0,
                max_emits_per_window: 1_000,
                window: Duration::from_secs(60),
            },
            heartbeat_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    fn coordinator(
        source: ScriptedSource,
        config: CoordinatorConfig,
    ) -> SessionCoordinator<ScriptedSource, MockRemote> {
        SessionCoordinator::new("job-1", source, MockRemote::default(), config)
    }

    async fn next_event(rx: &mut broadcast::Receiver<TrackingEvent>) -> TrackingEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed")
    }

    fn sample_after(secs: i64, latitude: f64) -> PositionSample {
        PositionSample::new(
            coord(latitude, 77.2),
            Some(5.0),
            Utc::now() + chrono::Duration::seconds(secs),
        )
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let c = coordinator(ScriptedSource::new(), permissive_config());

        let snapshot = c.start().await.unwrap();
        assert_eq!(snapshot.state, SessionState::Active);
        assert_eq!(snapshot.emit_count, 0);
        assert_eq!(
            snapshot.last_emitted.map(|s| s.coordinate),
            Some(coord(28.6, 77.2))
        );
        assert_eq!(c.remote().begin_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.source().watch_calls.load(Ordering::SeqCst), 1);

        assert_eq!(c.stop().await.unwrap(), StopOutcome::Clean);
        assert_eq!(c.state(), SessionState::Idle);
        assert_eq!(c.source().stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.remote().end_calls.load(Ordering::SeqCst), 1);
        assert!(c.status().last_emitted.is_none());
    }

    #[tokio::test]
    async fn test_start_failure_leaves_idle() {
        let denied = ScriptedSource::with_fix(Err(PositionError::new(
            PositionErrorKind::PermissionDenied,
            "user refused",
        )));
        let c = coordinator(denied, permissive_config());

        let err = c.start().await.unwrap_err();
        assert!(matches!(err, TrackingError::PermissionDenied(_)));
        assert_eq!(c.state(), SessionState::Idle);
        assert_eq!(c.remote().begin_calls.load(Ordering::SeqCst), 0);
        assert_eq!(c.source().watch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remote_begin_failure_leaves_idle() {
        let c = coordinator(ScriptedSource::new(), permissive_config());
        c.remote().fail_begin.store(true, Ordering::SeqCst);

        let err = c.start().await.unwrap_err();
        assert!(matches!(err, TrackingError::Network(RemoteError::HttpError(_))));
        assert_eq!(c.state(), SessionState::Idle);
        assert_eq!(c.source().watch_calls.load(Ordering::SeqCst), 0);
        assert!(c.status().last_emitted.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_fix_timeout() {
        let mut source = ScriptedSource::new();
        source.fix_delay = Duration::from_secs(60);
        let config = CoordinatorConfig {
            initial_fix_timeout: Duration::from_secs(1),
            ..permissive_config()
        };
        let c = coordinator(source, config);

        assert!(matches!(c.start().await, Err(TrackingError::Timeout(_))));
        assert_eq!(c.state(), SessionState::Idle);
        assert_eq!(c.remote().begin_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_watch_registration_failure_ends_remote_session() {
        let source = ScriptedSource::new();
        *source.watch_result.lock().unwrap() = Some(PositionError::new(
            PositionErrorKind::Unavailable,
            "no provider",
        ));
        let c = coordinator(source, permissive_config());

        assert!(matches!(c.start().await, Err(TrackingError::Unavailable(_))));
        assert_eq!(c.state(), SessionState::Idle);
        assert_eq!(c.remote().end_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let c = coordinator(ScriptedSource::new(), permissive_config());

        assert!(matches!(
            c.stop().await,
            Err(TrackingError::InvalidState {
                operation: "stop",
                state: SessionState::Idle
            })
        ));

        c.start().await.unwrap();
        assert!(matches!(
            c.start().await,
            Err(TrackingError::InvalidState {
                operation: "start",
                state: SessionState::Active
            })
        ));
        c.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_start_is_busy() {
        let mut source = ScriptedSource::new();
        source.fix_delay = Duration::from_millis(500);
        let c = coordinator(source, permissive_config());

        let (first, second) = tokio::join!(c.start(), async {
            tokio::task::yield_now().await;
            c.start().await
        });

        assert!(first.is_ok());
        assert!(matches!(second, Err(TrackingError::Busy)));
        c.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_accepted_samples_are_forwarded() {
        let c = coordinator(ScriptedSource::new(), permissive_config());
        let mut rx = c.subscribe();
        c.start().await.unwrap();
        assert!(matches!(next_event(&mut rx).await, TrackingEvent::Started { .. }));

        c.source().push(WatchEvent::Sample(sample_after(1, 28.61))).await;

        match next_event(&mut rx).await {
            TrackingEvent::LocationEmitted { emit_count, sample } => {
                assert_eq!(emit_count, 1);
                assert_eq!(sample.coordinate, coord(28.61, 77.2));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        tokio::time::timeout(Duration::from_secs(5), c.remote().update_seen.notified())
            .await
            .unwrap();
        assert_eq!(*c.remote().updates.lock().unwrap(), vec![coord(28.61, 77.2)]);
        assert_eq!(c.status().emit_count, 1);

        c.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_gate_suppression_is_reported() {
        let config = CoordinatorConfig {
            policy: UpdatePolicy {
                min_interval: Duration::from_secs(3600),
                ..UpdatePolicy::default()
            },
            ..permissive_config()
        };
        let c = coordinator(ScriptedSource::new(), config);
        let mut rx = c.subscribe();
        c.start().await.unwrap();
        let _ = next_event(&mut rx).await;

        c.source().push(WatchEvent::Sample(sample_after(1, 28.7))).await;

        match next_event(&mut rx).await {
            TrackingEvent::SampleSuppressed { decision, .. } => {
                assert_eq!(decision, GateDecision::TooSoon)
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(c.status().emit_count, 0);
        c.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_order_sample_discarded() {
        let c = coordinator(ScriptedSource::new(), permissive_config());
        let mut rx = c.subscribe();
        c.start().await.unwrap();
        let _ = next_event(&mut rx).await;

        let newer = sample_after(20, 28.62);
        let older = sample_after(10, 28.61);
        c.source().push(WatchEvent::Sample(newer.clone())).await;
        c.source().push(WatchEvent::Sample(older)).await;

        assert!(matches!(
            next_event(&mut rx).await,
            TrackingEvent::LocationEmitted { .. }
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            TrackingEvent::StaleSampleDiscarded { .. }
        ));

        let snapshot = c.status();
        assert_eq!(snapshot.emit_count, 1);
        assert_eq!(snapshot.last_emitted, Some(newer));
        c.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_watch_errors_fail_session() {
        let c = coordinator(ScriptedSource::new(), permissive_config());
        let mut rx = c.subscribe();
        c.start().await.unwrap();
        let _ = next_event(&mut rx).await;

        for _ in 0..3 {
            c.source()
                .push(WatchEvent::Error(PositionError::new(
                    PositionErrorKind::Timeout,
                    "no fix",
                )))
                .await;
        }

        for expected in 1..=3 {
            match next_event(&mut rx).await {
                TrackingEvent::WatchError { consecutive, .. } => assert_eq!(consecutive, expected),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert!(matches!(
            next_event(&mut rx).await,
            TrackingEvent::Failed {
                error: TrackingError::Timeout(_)
            }
        ));

        assert_eq!(c.state(), SessionState::Failed);
        assert_eq!(c.source().stop_calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            c.stop().await,
            Err(TrackingError::InvalidState { .. })
        ));

        // Restart from Failed re-runs the handshake
        c.start().await.unwrap();
        assert_eq!(c.remote().begin_calls.load(Ordering::SeqCst), 2);
        c.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_sample_resets_error_count() {
        let c = coordinator(ScriptedSource::new(), permissive_config());
        let mut rx = c.subscribe();
        c.start().await.unwrap();
        let _ = next_event(&mut rx).await;

        let timeout = || WatchEvent::Error(PositionError::new(PositionErrorKind::Timeout, "slow"));
        c.source().push(timeout()).await;
        c.source().push(timeout()).await;
        c.source().push(WatchEvent::Sample(sample_after(1, 28.61))).await;
        c.source().push(timeout()).await;

        let mut last_consecutive = 0;
        for _ in 0..4 {
            if let TrackingEvent::WatchError { consecutive, .. } = next_event(&mut rx).await {
                last_consecutive = consecutive;
            }
        }
        assert_eq!(last_consecutive, 1);
        assert_eq!(c.state(), SessionState::Active);
        c.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_permission_denied_during_watch_is_fatal() {
        let c = coordinator(ScriptedSource::new(), permissive_config());
        let mut rx = c.subscribe();
        c.start().await.unwrap();
        let _ = next_event(&mut rx).await;

        c.source()
            .push(WatchEvent::Error(PositionError::new(
                PositionErrorKind::PermissionDenied,
                "revoked",
            )))
            .await;

        assert!(matches!(next_event(&mut rx).await, TrackingEvent::WatchError { .. }));
        assert!(matches!(
            next_event(&mut rx).await,
            TrackingEvent::Failed {
                error: TrackingError::PermissionDenied(_)
            }
        ));
        assert_eq!(c.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_remote_update_failure_keeps_session_active() {
        let c = coordinator(ScriptedSource::new(), permissive_config());
        c.remote().fail_updates.store(true, Ordering::SeqCst);
        let mut rx = c.subscribe();
        c.start().await.unwrap();
        let _ = next_event(&mut rx).await;

        c.source().push(WatchEvent::Sample(sample_after(1, 28.61))).await;

        assert!(matches!(
            next_event(&mut rx).await,
            TrackingEvent::LocationEmitted { .. }
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            TrackingEvent::RemoteUpdateFailed { .. }
        ));
        assert_eq!(c.state(), SessionState::Active);
        c.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_racing_watch_failure_has_one_outcome() {
        let config = CoordinatorConfig {
            max_consecutive_watch_errors: 1,
            ..permissive_config()
        };
        let c = coordinator(ScriptedSource::new(), config);
        let mut rx = c.subscribe();
        c.start().await.unwrap();

        let sender = c.source().sender.lock().unwrap().clone().unwrap();
        let error = tokio::spawn(async move {
            let _ = sender
                .send(WatchEvent::Error(PositionError::new(
                    PositionErrorKind::Timeout,
                    "lost fix",
                )))
                .await;
        });
        let stopped = c.stop().await;
        error.await.unwrap();

        let is_terminal =
            |e: &TrackingEvent| matches!(e, TrackingEvent::Failed { .. } | TrackingEvent::Stopped { .. });

        match stopped {
            Ok(_) => {
                assert_eq!(c.state(), SessionState::Idle);
                assert_eq!(c.remote().end_calls.load(Ordering::SeqCst), 1);
                let mut terminal = Vec::new();
                while let Ok(event) = rx.try_recv() {
                    if is_terminal(&event) {
                        terminal.push(event);
                    }
                }
                assert!(matches!(terminal[..], [TrackingEvent::Stopped { .. }]));
            }
            Err(TrackingError::InvalidState { state, .. }) => {
                assert_eq!(state, SessionState::Failed);
                assert_eq!(c.remote().end_calls.load(Ordering::SeqCst), 0);
                loop {
                    match next_event(&mut rx).await {
                        TrackingEvent::Failed { .. } => break,
                        TrackingEvent::Stopped { .. } => panic!("stopped after failing"),
                        _ => {}
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert!(!std::iter::from_fn(|| rx.try_recv().ok()).any(|e| is_terminal(&e)));
            }
            Err(other) => panic!("unexpected stop error: {:?}", other),
        }
    }

    #[test]
    fn test_fail_ignored_once_stopping() {
        let c = coordinator(ScriptedSource::new(), permissive_config());
        let mut rx = c.subscribe();
        c.shared.set_state(SessionState::Stopping);

        c.shared.fail(
            TrackingError::Timeout("late watch error".to_string()),
            &CancellationToken::new(),
        );

        assert_eq!(c.state(), SessionState::Stopping);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_with_remote_failure_still_idle() {
        let c = coordinator(ScriptedSource::new(), permissive_config());
        c.start().await.unwrap();
        c.remote().fail_end.store(true, Ordering::SeqCst);

        let outcome = c.stop().await.unwrap();
        assert_eq!(outcome, StopOutcome::RemoteEndFailed(RemoteError::Timeout));
        assert_eq!(c.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_resends_last_emitted() {
        let config = CoordinatorConfig {
            heartbeat_interval: Duration::from_secs(30),
            ..permissive_config()
        };
        let c = coordinator(ScriptedSource::new(), config);
        let mut rx = c.subscribe();
        c.start().await.unwrap();
        let _ = next_event(&mut rx).await;

        tokio::time::advance(Duration::from_secs(31)).await;

        match next_event(&mut rx).await {
            TrackingEvent::HeartbeatSent { location } => assert_eq!(location, coord(28.6, 77.2)),
            other => panic!("unexpected event: {:?}", other),
        }

        c.stop().await.unwrap();
        let sent = c.remote().updates.lock().unwrap().len();
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(c.remote().updates.lock().unwrap().len(), sent);
    }

    #[tokio::test]
    async fn test_samples_after_stop_are_ignored() {
        let c = coordinator(ScriptedSource::new(), permissive_config());
        c.start().await.unwrap();
        let sender = c.source().sender.lock().unwrap().clone().unwrap();
        c.stop().await.unwrap();

        // The watch loop is gone; the channel is closed
        assert!(sender
            .send(WatchEvent::Sample(sample_after(1, 28.61)))
            .await
            .is_err());
        assert_eq!(c.status().emit_count, 0);
        assert!(c.remote().updates.lock().unwrap().is_empty());
    }
}

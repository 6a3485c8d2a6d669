//! Periodic session status logging.
//!
//! Spawns a background task that logs the provider session snapshot at a
//! fixed interval, useful for following a long-running session in the log
//! file without subscribing to every event.
//!
//! # Output Format
//!
//! Logs are emitted at DEBUG level with structured fields:
//! - `session_id` - Tracked booking/job identifier
//! - `state` - Coordinator lifecycle state
//! - `lat`, `lon` - Last emitted position in decimal degrees
//! - `accuracy_m` - Accuracy of the last emitted fix
//! - `emits` - Accepted updates in this session
//! - `age_secs` - Seconds since the last emit

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::coordinator::SessionCoordinator;
use super::remote::RemoteChannel;
use super::source::PositionSource;
use super::state::SessionSnapshot;

/// Default logging interval (20 seconds).
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(20);

/// Spawns a background task that periodically logs the session snapshot.
///
/// The task stops when `cancellation` is triggered. Callers should check
/// `tracing::enabled!(tracing::Level::DEBUG)` first, since nothing is
/// recorded otherwise.
pub fn spawn_session_logger<S, R>(
    coordinator: Arc<SessionCoordinator<S, R>>,
    cancellation: CancellationToken,
    interval: Duration,
) -> JoinHandle<()>
where
    S: PositionSource + 'static,
    R: RemoteChannel + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    log_snapshot(&coordinator.status());
                }
                _ = cancellation.cancelled() => {
                    tracing::debug!("Session logger stopped");
                    break;
                }
            }
        }
    })
}

fn log_snapshot(snapshot: &SessionSnapshot) {
    match &snapshot.last_emitted {
        Some(sample) => {
            let age_secs = snapshot
                .last_emitted_at
                .map(|at| (Utc::now() - at).num_seconds().max(0));

            tracing::debug!(
                session_id = %snapshot.session_id,
                state = %snapshot.state,
                lat = format!("{:.5}", sample.coordinate.latitude),
                lon = format!("{:.5}", sample.coordinate.longitude),
                accuracy_m = ?sample.accuracy_meters(),
                emits = snapshot.emit_count,
                age_secs = ?age_secs,
                "Tracking session status"
            );
        }
        None => {
            tracing::debug!(
                session_id = %snapshot.session_id,
                state = %snapshot.state,
                "Tracking session status (no position)"
            );
        }
    }
}

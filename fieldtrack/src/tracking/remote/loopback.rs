//! In-process tracking service.
//!
//! [`LoopbackHub`] plays the server side of both channels: it accepts REST
//! calls through [`RemoteChannel`] and fans them out as push events to every
//! [`LoopbackConnection`] that joined the session. The CLI `demo` command and
//! the integration tests wire a provider and an observer through it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::client::{PushChannel, RemoteChannel};
use super::error::RemoteError;
use super::events::{InboundEvent, OutboundEvent, TrackingStatus};
use crate::tracking::geo::Coordinate;
use crate::tracking::state::Role;

/// Capacity of each joined event stream.
pub const LOOPBACK_STREAM_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default)]
struct SessionRecord {
    is_active: bool,
    current_location: Option<Coordinate>,
    last_update: Option<DateTime<Utc>>,
}

struct Subscriber {
    connection: u64,
    session_id: String,
    sender: mpsc::Sender<InboundEvent>,
}

#[derive(Default)]
struct HubInner {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_connection: AtomicU64,
}

/// Shared in-process tracking service. Cloning shares the same state.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a push connection to this hub.
    pub fn connect(&self) -> LoopbackConnection {
        let id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        LoopbackConnection {
            hub: self.clone(),
            id,
        }
    }

    /// Announce that the provider of `session_id` dropped off.
    pub fn set_offline(&self, session_id: &str) {
        self.broadcast(InboundEvent::ProviderOffline {
            session_id: session_id.to_string(),
        });
    }

    /// Number of joined streams for `session_id`.
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.session_id == session_id && !s.sender.is_closed())
            .count()
    }

    fn record_location(
        &self,
        session_id: &str,
        location: Coordinate,
        at: DateTime<Utc>,
    ) -> Result<(), RemoteError> {
        let mut sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get_mut(session_id) {
            Some(record) if record.is_active => {
                record.current_location = Some(location);
                record.last_update = Some(at);
                Ok(())
            }
            _ => Err(RemoteError::Status { status: 404 }),
        }
    }

    /// Deliver `event` to every stream joined to its session.
    ///
    /// Full streams drop the event; closed streams are unregistered.
    fn broadcast(&self, event: InboundEvent) {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        subscribers.retain(|s| !s.sender.is_closed());

        let mut delivered = 0usize;
        for subscriber in subscribers
            .iter()
            .filter(|s| s.session_id == event.session_id())
        {
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => trace!(
                    connection = subscriber.connection,
                    error = %e,
                    "Loopback stream dropped event"
                ),
            }
        }

        trace!(session_id = event.session_id(), delivered, "Loopback event fanned out");
    }

    fn unsubscribe(&self, connection: u64, session_id: Option<&str>) {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| {
                s.connection != connection || session_id.is_some_and(|id| s.session_id != id)
            });
    }
}

impl RemoteChannel for LoopbackHub {
    async fn begin_session(&self, session_id: &str, location: Coordinate) -> Result<(), RemoteError> {
        {
            let mut sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.insert(
                session_id.to_string(),
                SessionRecord {
                    is_active: true,
                    current_location: Some(location),
                    last_update: Some(Utc::now()),
                },
            );
        }

        debug!(session_id, location = %location, "Loopback session started");
        self.broadcast(InboundEvent::TrackingStarted {
            session_id: session_id.to_string(),
            initial_location: location,
        });
        Ok(())
    }

    async fn update_location(&self, session_id: &str, location: Coordinate) -> Result<(), RemoteError> {
        let now = Utc::now();
        self.record_location(session_id, location, now)?;
        self.broadcast(InboundEvent::LocationReceived {
            session_id: session_id.to_string(),
            latitude: location.latitude,
            longitude: location.longitude,
            timestamp: now,
        });
        Ok(())
    }

    async fn end_session(&self, session_id: &str) -> Result<(), RemoteError> {
        {
            let mut sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
            match sessions.get_mut(session_id) {
                Some(record) if record.is_active => record.is_active = false,
                _ => return Err(RemoteError::Status { status: 404 }),
            }
        }

        debug!(session_id, "Loopback session stopped");
        self.broadcast(InboundEvent::TrackingStopped {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    async fn fetch_status(&self, session_id: &str) -> Result<TrackingStatus, RemoteError> {
        let sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions
            .get(session_id)
            .map(|record| TrackingStatus {
                is_active: record.is_active,
                current_location: record.current_location,
                last_update_timestamp: record.last_update,
            })
            .unwrap_or_default())
    }
}

/// One participant's push connection to a [`LoopbackHub`].
///
/// Dropping the connection leaves every session it joined.
pub struct LoopbackConnection {
    hub: LoopbackHub,
    id: u64,
}

impl LoopbackConnection {
    /// Connection identifier, unique per hub.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PushChannel for LoopbackConnection {
    async fn join(
        &self,
        session_id: &str,
        role: Role,
        participant_id: &str,
    ) -> Result<mpsc::Receiver<InboundEvent>, RemoteError> {
        let (sender, receiver) = mpsc::channel(LOOPBACK_STREAM_CAPACITY);

        let mut subscribers = self
            .hub
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        // Rejoining replaces the previous stream
        subscribers.retain(|s| !(s.connection == self.id && s.session_id == session_id));
        subscribers.push(Subscriber {
            connection: self.id,
            session_id: session_id.to_string(),
            sender,
        });

        debug!(
            connection = self.id,
            session_id,
            %role,
            participant_id,
            "Joined loopback session"
        );
        Ok(receiver)
    }

    async fn leave(&self, session_id: &str) -> Result<(), RemoteError> {
        self.hub.unsubscribe(self.id, Some(session_id));
        debug!(connection = self.id, session_id, "Left loopback session");
        Ok(())
    }

    async fn publish(&self, event: OutboundEvent) -> Result<(), RemoteError> {
        match event {
            OutboundEvent::LocationUpdate {
                session_id,
                latitude,
                longitude,
                timestamp,
            } => {
                let location = Coordinate {
                    latitude,
                    longitude,
                };
                self.hub.record_location(&session_id, location, timestamp)?;
                self.hub.broadcast(InboundEvent::LocationReceived {
                    session_id,
                    latitude,
                    longitude,
                    timestamp,
                });
                Ok(())
            }
            OutboundEvent::LeaveTracking { session_id } => self.leave(&session_id).await,
            OutboundEvent::JoinTracking { session_id, .. } => {
                // Membership without a stream is meaningless here; use join()
                trace!(connection = self.id, session_id, "Ignoring published joinTracking");
                Ok(())
            }
        }
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn coord(latitude: f64, longitude: f64) -> Coordinate {
        Coordinate {
            latitude,
            longitude,
        }
    }

    async fn next(rx: &mut mpsc::Receiver<InboundEvent>) -> InboundEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("stream closed")
    }

    #[tokio::test]
    async fn test_provider_calls_fan_out_to_observer() {
        let hub = LoopbackHub::new();
        let observer = hub.connect();
        let mut rx = observer.join("job-1", Role::Observer, "cust-1").await.unwrap();

        hub.begin_session("job-1", coord(1.0, 2.0)).await.unwrap();
        hub.update_location("job-1", coord(1.1, 2.0)).await.unwrap();
        hub.end_session("job-1").await.unwrap();

        assert!(matches!(next(&mut rx).await, InboundEvent::TrackingStarted { .. }));
        match next(&mut rx).await {
            InboundEvent::LocationReceived { latitude, .. } => assert_eq!(latitude, 1.1),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(next(&mut rx).await, InboundEvent::TrackingStopped { .. }));
    }

    #[tokio::test]
    async fn test_events_are_scoped_to_session() {
        let hub = LoopbackHub::new();
        let observer = hub.connect();
        let mut rx = observer.join("job-1", Role::Observer, "cust-1").await.unwrap();

        hub.begin_session("job-2", coord(1.0, 2.0)).await.unwrap();
        hub.set_offline("job-1");

        assert!(matches!(next(&mut rx).await, InboundEvent::ProviderOffline { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_status_reflects_session() {
        let hub = LoopbackHub::new();

        let unknown = hub.fetch_status("job-1").await.unwrap();
        assert!(!unknown.is_active);
        assert!(unknown.current_location.is_none());

        hub.begin_session("job-1", coord(1.0, 2.0)).await.unwrap();
        hub.update_location("job-1", coord(3.0, 4.0)).await.unwrap();
        let status = hub.fetch_status("job-1").await.unwrap();
        assert!(status.is_active);
        assert_eq!(status.current_location, Some(coord(3.0, 4.0)));
        assert!(status.last_update_timestamp.is_some());

        hub.end_session("job-1").await.unwrap();
        let status = hub.fetch_status("job-1").await.unwrap();
        assert!(!status.is_active);
        assert_eq!(status.current_location, Some(coord(3.0, 4.0)));
    }

    #[tokio::test]
    async fn test_update_without_session_is_rejected() {
        let hub = LoopbackHub::new();
        assert_eq!(
            hub.update_location("nope", coord(0.0, 0.0)).await,
            Err(RemoteError::Status { status: 404 })
        );
        assert_eq!(
            hub.end_session("nope").await,
            Err(RemoteError::Status { status: 404 })
        );
    }

    #[tokio::test]
    async fn test_leave_closes_stream() {
        let hub = LoopbackHub::new();
        let observer = hub.connect();
        let mut rx = observer.join("job-1", Role::Observer, "cust-1").await.unwrap();
        assert_eq!(hub.subscriber_count("job-1"), 1);

        observer.leave("job-1").await.unwrap();
        assert_eq!(hub.subscriber_count("job-1"), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_connection_unsubscribes() {
        let hub = LoopbackHub::new();
        let observer = hub.connect();
        let _rx = observer.join("job-1", Role::Observer, "cust-1").await.unwrap();

        drop(observer);
        assert_eq!(hub.subscriber_count("job-1"), 0);
    }

    #[tokio::test]
    async fn test_published_location_update_keeps_timestamp() {
        let hub = LoopbackHub::new();
        let provider = hub.connect();
        let observer = hub.connect();
        let mut rx = observer.join("job-1", Role::Observer, "cust-1").await.unwrap();

        hub.begin_session("job-1", coord(1.0, 2.0)).await.unwrap();
        let _ = next(&mut rx).await;

        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        provider
            .publish(OutboundEvent::LocationUpdate {
                session_id: "job-1".to_string(),
                latitude: 5.0,
                longitude: 6.0,
                timestamp: at,
            })
            .await
            .unwrap();

        match next(&mut rx).await {
            InboundEvent::LocationReceived { timestamp, .. } => assert_eq!(timestamp, at),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(
            hub.fetch_status("job-1").await.unwrap().last_update_timestamp,
            Some(at)
        );
    }
}

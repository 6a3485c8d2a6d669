//! Wire types for the tracking service.
//!
//! Push channel messages are JSON objects tagged by an `event` field, with
//! camelCase names and millisecond epoch timestamps:
//!
//! ```text
//! {"event":"locationReceived","sessionId":"job-42","latitude":28.6,"longitude":77.2,"timestamp":1700000000000}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tracking::geo::Coordinate;
use crate::tracking::state::Role;

/// Events received from the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundEvent {
    /// The provider reported a new position.
    LocationReceived {
        session_id: String,
        latitude: f64,
        longitude: f64,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },

    /// The provider began a tracking session.
    TrackingStarted {
        session_id: String,
        initial_location: Coordinate,
    },

    /// The provider ended the tracking session.
    TrackingStopped { session_id: String },

    /// The provider's connection dropped.
    ProviderOffline { session_id: String },
}

impl InboundEvent {
    /// Session this event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            Self::LocationReceived { session_id, .. }
            | Self::TrackingStarted { session_id, .. }
            | Self::TrackingStopped { session_id }
            | Self::ProviderOffline { session_id } => session_id,
        }
    }
}

/// Events sent on the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    /// Join a session's event stream.
    JoinTracking {
        session_id: String,
        role: Role,
        participant_id: String,
    },

    /// Leave a session's event stream.
    LeaveTracking { session_id: String },

    /// Publish a provider position.
    LocationUpdate {
        session_id: String,
        latitude: f64,
        longitude: f64,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
}

/// Body of the start and location REST calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationBody {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<Coordinate> for LocationBody {
    fn from(c: Coordinate) -> Self {
        Self {
            latitude: c.latitude,
            longitude: c.longitude,
        }
    }
}

/// Response of `GET /tracking/{id}/status`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStatus {
    /// Whether the provider's session is live.
    pub is_active: bool,

    /// Most recent provider position, if any.
    #[serde(default)]
    pub current_location: Option<Coordinate>,

    /// When `current_location` was reported.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_update_timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_received_deserialize() {
        let json = r#"{
            "event": "locationReceived",
            "sessionId": "job-42",
            "latitude": 28.6139,
            "longitude": 77.209,
            "timestamp": 1700000000123
        }"#;

        let event: InboundEvent = serde_json::from_str(json).unwrap();
        match event {
            InboundEvent::LocationReceived {
                session_id,
                latitude,
                timestamp,
                ..
            } => {
                assert_eq!(session_id, "job-42");
                assert!((latitude - 28.6139).abs() < 1e-9);
                assert_eq!(timestamp.timestamp_millis(), 1_700_000_000_123);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_tracking_started_deserialize() {
        let json = r#"{"event":"trackingStarted","sessionId":"job-42","initialLocation":{"latitude":1.5,"longitude":2.5}}"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            InboundEvent::TrackingStarted {
                session_id: "job-42".to_string(),
                initial_location: Coordinate {
                    latitude: 1.5,
                    longitude: 2.5
                },
            }
        );
        assert_eq!(event.session_id(), "job-42");
    }

    #[test]
    fn test_join_tracking_serialize() {
        let event = OutboundEvent::JoinTracking {
            session_id: "job-42".to_string(),
            role: Role::Observer,
            participant_id: "cust-7".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "event": "joinTracking",
                "sessionId": "job-42",
                "role": "observer",
                "participantId": "cust-7"
            })
        );
    }

    #[test]
    fn test_unknown_event_rejected() {
        let json = r#"{"event":"somethingElse","sessionId":"x"}"#;
        assert!(serde_json::from_str::<InboundEvent>(json).is_err());
    }

    #[test]
    fn test_status_deserialize_with_missing_location() {
        let json = r#"{"isActive": false}"#;
        let status: TrackingStatus = serde_json::from_str(json).unwrap();
        assert!(!status.is_active);
        assert!(status.current_location.is_none());
        assert!(status.last_update_timestamp.is_none());
    }

    #[test]
    fn test_status_deserialize_full() {
        let json = r#"{
            "isActive": true,
            "currentLocation": {"latitude": 28.6, "longitude": 77.2},
            "lastUpdateTimestamp": 1700000000000
        }"#;
        let status: TrackingStatus = serde_json::from_str(json).unwrap();
        assert!(status.is_active);
        assert_eq!(
            status.current_location,
            Some(Coordinate {
                latitude: 28.6,
                longitude: 77.2
            })
        );
        assert_eq!(
            status.last_update_timestamp.map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
    }
}

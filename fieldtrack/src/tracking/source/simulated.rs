//! Simulated position source that replays a route.
//!
//! Useful for demos and for driving a session against a real backend without
//! a device. Waypoints are linearly interpolated (`steps_per_leg` points per
//! leg) and one point is delivered per `interval`. Once the route is
//! exhausted the source keeps reporting the final point, like a stationary
//! device, unless `repeat` is set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{PositionError, PositionErrorKind, PositionSource, WatchEvent, WatchHandle};
use crate::tracking::geo::Coordinate;
use crate::tracking::state::PositionSample;

/// Configuration for [`SimulatedSource`].
#[derive(Debug, Clone)]
pub struct SimulatedSourceConfig {
    /// Delay between delivered points.
    pub interval: Duration,

    /// Accuracy reported with every sample, in meters.
    pub accuracy_m: f64,

    /// Interpolated points per leg between consecutive waypoints.
    pub steps_per_leg: u32,

    /// Restart from the first waypoint after the last one.
    pub repeat: bool,
}

impl Default for SimulatedSourceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            accuracy_m: 8.0,
            steps_per_leg: 10,
            repeat: false,
        }
    }
}

/// Route-replaying position source.
pub struct SimulatedSource {
    points: Arc<Vec<Coordinate>>,
    config: SimulatedSourceConfig,
    /// Last delivered point, reported by `current_position`.
    position: Arc<Mutex<Coordinate>>,
    watches: Mutex<HashMap<u64, CancellationToken>>,
    next_handle: AtomicU64,
}

impl SimulatedSource {
    /// Create a source for `route`.
    ///
    /// Fails with `Unavailable` if the route is empty or contains an invalid
    /// coordinate.
    pub fn new(route: Vec<Coordinate>, config: SimulatedSourceConfig) -> Result<Self, PositionError> {
        if let Some(bad) = route.iter().find(|c| !c.is_valid()) {
            return Err(PositionError::new(
                PositionErrorKind::Unavailable,
                format!("route contains invalid coordinate {}", bad),
            ));
        }

        let points = interpolate(&route, config.steps_per_leg);
        let Some(first) = points.first().copied() else {
            return Err(PositionError::new(
                PositionErrorKind::Unavailable,
                "route has no waypoints",
            ));
        };

        Ok(Self {
            points: Arc::new(points),
            config,
            position: Arc::new(Mutex::new(first)),
            watches: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    /// Number of interpolated points in one pass of the route.
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Number of watches currently registered.
    pub fn active_watches(&self) -> usize {
        self.watches.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn current(&self) -> Coordinate {
        *self.position.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PositionSource for SimulatedSource {
    async fn current_position(&self, _timeout: Duration) -> Result<PositionSample, PositionError> {
        Ok(PositionSample::now(
            self.current(),
            Some(self.config.accuracy_m),
        ))
    }

    fn watch_position(&self, events: mpsc::Sender<WatchEvent>) -> Result<WatchHandle, PositionError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            PositionError::new(
                PositionErrorKind::Unavailable,
                "simulated watch requires a tokio runtime",
            )
        })?;

        let handle = WatchHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let cancellation = CancellationToken::new();
        self.watches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.0, cancellation.clone());

        let points = Arc::clone(&self.points);
        let position = Arc::clone(&self.position);
        let config = self.config.clone();

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            let mut index = 0usize;

            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let point = points[index];
                *position.lock().unwrap_or_else(|e| e.into_inner()) = point;

                let sample = PositionSample::now(point, Some(config.accuracy_m));
                match events.try_send(WatchEvent::Sample(sample)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        trace!(index, "Watch queue full, dropping simulated sample");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }

                index = next_index(index, points.len(), config.repeat);
            }

            debug!(handle = handle.0, "Simulated watch stopped");
        });

        debug!(handle = handle.0, points = self.points.len(), "Simulated watch started");
        Ok(handle)
    }

    fn stop_watch(&self, handle: WatchHandle) {
        if let Some(token) = self
            .watches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.0)
        {
            token.cancel();
        }
    }
}

fn next_index(index: usize, len: usize, repeat: bool) -> usize {
    if index + 1 < len {
        index + 1
    } else if repeat {
        0
    } else {
        index
    }
}

/// Linearly interpolate `steps_per_leg` points on each leg, keeping both ends.
fn interpolate(route: &[Coordinate], steps_per_leg: u32) -> Vec<Coordinate> {
    let steps = steps_per_leg.max(1);
    let mut points = Vec::new();

    for leg in route.windows(2) {
        let (from, to) = (leg[0], leg[1]);
        for step in 0..steps {
            let t = f64::from(step) / f64::from(steps);
            points.push(Coordinate {
                latitude: from.latitude + (to.latitude - from.latitude) * t,
                longitude: from.longitude + (to.longitude - from.longitude) * t,
            });
        }
    }

    if let Some(last) = route.last() {
        points.push(*last);
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(latitude: f64, longitude: f64) -> Coordinate {
        Coordinate {
            latitude,
            longitude,
        }
    }

    #[test]
    fn test_interpolate_keeps_endpoints() {
        let route = vec![coord(0.0, 0.0), coord(1.0, 2.0)];
        let points = interpolate(&route, 4);

        assert_eq!(points.len(), 5);
        assert_eq!(points[0], coord(0.0, 0.0));
        assert_eq!(points[2], coord(0.5, 1.0));
        assert_eq!(points[4], coord(1.0, 2.0));
    }

    #[test]
    fn test_single_waypoint_route() {
        let points = interpolate(&[coord(28.6, 77.2)], 10);
        assert_eq!(points, vec![coord(28.6, 77.2)]);
    }

    #[test]
    fn test_empty_route_rejected() {
        let result = SimulatedSource::new(Vec::new(), SimulatedSourceConfig::default());
        assert!(matches!(
            result,
            Err(PositionError {
                kind: PositionErrorKind::Unavailable,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_waypoint_rejected() {
        let result = SimulatedSource::new(
            vec![coord(28.6, 77.2), coord(128.6, 77.2)],
            SimulatedSourceConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_next_index() {
        assert_eq!(next_index(0, 3, false), 1);
        assert_eq!(next_index(2, 3, false), 2);
        assert_eq!(next_index(2, 3, true), 0);
    }

    #[tokio::test]
    async fn test_current_position_starts_at_first_waypoint() {
        let source =
            SimulatedSource::new(vec![coord(28.6, 77.2)], SimulatedSourceConfig::default())
                .unwrap();

        let sample = source
            .current_position(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(sample.coordinate, coord(28.6, 77.2));
        assert_eq!(sample.accuracy, Some(8.0));
    }

    #[tokio::test]
    async fn test_watch_delivers_route_and_stops() {
        let config = SimulatedSourceConfig {
            interval: Duration::from_millis(5),
            steps_per_leg: 2,
            ..Default::default()
        };
        let source =
            SimulatedSource::new(vec![coord(0.0, 0.0), coord(0.0, 1.0)], config).unwrap();
        let (tx, mut rx) = mpsc::channel(16);

        let handle = source.watch_position(tx).unwrap();
        assert_eq!(source.active_watches(), 1);

        let mut received = Vec::new();
        for _ in 0..3 {
            match rx.recv().await {
                Some(WatchEvent::Sample(s)) => received.push(s.coordinate),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(
            received,
            vec![coord(0.0, 0.0), coord(0.0, 0.5), coord(0.0, 1.0)]
        );

        source.stop_watch(handle);
        assert_eq!(source.active_watches(), 0);

        // Stopped watch drops its sender, closing the channel
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }
}

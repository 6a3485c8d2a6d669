//! Shared utilities for CLI commands.
//!
//! Argument parsing for coordinates and routes, and the console rendering
//! of tracking events used by several commands.

use std::time::Duration;

use fieldtrack::tracking::{Coordinate, ObservedPosition, TrackingEvent};

use crate::error::CliError;

/// Parse a `"lat,lon"` argument.
///
/// Used as a clap `value_parser`, so errors are plain strings.
pub fn parse_coordinate(value: &str) -> Result<Coordinate, String> {
    value.parse::<Coordinate>().map_err(|e| e.to_string())
}

/// Parse a route of `"lat,lon"` waypoints separated by `;`.
pub fn parse_route(value: &str) -> Result<Vec<Coordinate>, CliError> {
    let route = value
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<Coordinate>()
                .map_err(|e| CliError::InvalidArgument(format!("route waypoint '{}': {}", p, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if route.is_empty() {
        return Err(CliError::InvalidArgument(
            "route needs at least one 'lat,lon' waypoint".to_string(),
        ));
    }
    Ok(route)
}

/// Console line for a provider-side event, or `None` for events not worth
/// printing without `--verbose`.
pub fn describe_event(event: &TrackingEvent, verbose: bool) -> Option<String> {
    match event {
        TrackingEvent::Started { initial } => {
            Some(format!("Tracking started at {}", initial.coordinate))
        }
        TrackingEvent::LocationEmitted { sample, emit_count } => Some(format!(
            "  -> #{:<4} {}{}",
            emit_count,
            sample.coordinate,
            sample
                .accuracy_meters()
                .map(|a| format!(" (+/-{:.0} m)", a))
                .unwrap_or_default()
        )),
        TrackingEvent::SampleSuppressed { sample, decision } => {
            verbose.then(|| format!("     skip {} ({})", sample.coordinate, decision))
        }
        TrackingEvent::StaleSampleDiscarded { sample } => verbose.then(|| {
            format!(
                "     stale {} captured {}",
                sample.coordinate,
                sample.captured_at.format("%H:%M:%S%.3f")
            )
        }),
        TrackingEvent::WatchError { error, consecutive } => Some(format!(
            "  !  position error ({} in a row): {}",
            consecutive, error
        )),
        TrackingEvent::HeartbeatSent { location } => {
            verbose.then(|| format!("     heartbeat {}", location))
        }
        TrackingEvent::RemoteUpdateFailed { error } => {
            Some(format!("  !  update not delivered: {}", error))
        }
        TrackingEvent::Failed { error } => Some(format!("Tracking failed: {}", error)),
        TrackingEvent::Stopped { remote_end_ok } => Some(if *remote_end_ok {
            "Tracking stopped".to_string()
        } else {
            "Tracking stopped (service did not acknowledge)".to_string()
        }),
    }
}

/// Console line for an observer view change.
pub fn describe_view(view: &ObservedPosition) -> String {
    let location = view
        .location
        .map(|c| c.to_string())
        .unwrap_or_else(|| "(unknown)".to_string());
    let updated = view
        .updated_at
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());

    format!("  <- {} at {} [{}]", location, updated, view.provider)
}

/// Wait for Ctrl-C, or for `limit` to elapse when given.
pub async fn wait_for_shutdown(limit: Option<Duration>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    match limit {
        Some(limit) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = tokio::time::sleep(limit) => {}
            }
        }
        None => ctrl_c.await,
    }
}

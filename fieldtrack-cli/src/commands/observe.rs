//! Observe command - follow a provider's position through the REST API.
//!
//! Polls `GET /tracking/{id}/status` and prints the reconciled view whenever
//! it changes. Stops on Ctrl-C, after `--duration`, or once the provider's
//! session ends.

use std::time::Duration;

use fieldtrack::tracking::{
    ObservedPosition, ProviderPresence, RemoteChannel, RemoteError,
};
use tracing::{debug, info, warn};

use super::common::{describe_view, wait_for_shutdown};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Consecutive poll failures tolerated before giving up.
const MAX_POLL_FAILURES: u32 = 5;

/// Arguments for the observe command.
pub struct ObserveArgs {
    pub session_id: String,
    pub interval_secs: Option<u64>,
    pub duration: Option<u64>,
    pub token: Option<String>,
}

/// Run the observe command.
pub async fn run(runner: &CliRunner, args: ObserveArgs) -> Result<(), CliError> {
    runner.log_startup("observe");

    let interval = args
        .interval_secs
        .map(Duration::from_secs)
        .unwrap_or(runner.config().to_observer_config().status_poll_interval);
    if interval.is_zero() {
        return Err(CliError::InvalidArgument(
            "status poll interval must be greater than zero".to_string(),
        ));
    }

    let remote = runner.remote_channel(args.token)?;

    println!(
        "Watching session '{}' every {}s (Ctrl-C to stop)",
        args.session_id,
        interval.as_secs()
    );

    tokio::select! {
        result = poll_status(&remote, &args.session_id, interval) => result,
        _ = wait_for_shutdown(args.duration.map(Duration::from_secs)) => {
            info!("Shutdown requested");
            Ok(())
        }
    }
}

/// Poll until the provider stops or polling keeps failing.
async fn poll_status<R: RemoteChannel>(
    remote: &R,
    session_id: &str,
    interval: Duration,
) -> Result<(), CliError> {
    let mut view = ObservedPosition::default();
    let mut failures = 0u32;
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        match remote.fetch_status(session_id).await {
            Ok(status) => {
                failures = 0;
                if view.apply_status(&status) {
                    println!("{}", describe_view(&view));
                } else {
                    debug!(session_id, "Status unchanged");
                }

                if view.provider == ProviderPresence::Stopped {
                    println!("Provider has stopped tracking.");
                    return Ok(());
                }
            }
            Err(e @ RemoteError::Unauthorized { .. }) => return Err(e.into()),
            Err(e) => {
                failures += 1;
                warn!(session_id, error = %e, failures, "Status poll failed");
                if failures >= MAX_POLL_FAILURES {
                    return Err(e.into());
                }
            }
        }
    }
}

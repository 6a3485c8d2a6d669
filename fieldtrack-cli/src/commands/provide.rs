//! Provide command - run a provider tracking session against the service.
//!
//! Replays a route through the simulated position source, pushes gated
//! updates to the configured tracking service, and stops the session on
//! Ctrl-C (or after `--duration`).

use std::sync::Arc;
use std::time::Duration;

use fieldtrack::tracking::{
    spawn_session_logger, SessionCoordinator, SessionState, SimulatedSource,
    SimulatedSourceConfig, StopOutcome, TrackingError, TrackingEvent, DEFAULT_LOG_INTERVAL,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::common::{describe_event, parse_route, wait_for_shutdown};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the provide command.
pub struct ProvideArgs {
    pub session_id: String,
    pub route: String,
    pub interval_ms: u64,
    pub steps: u32,
    pub repeat: bool,
    pub duration: Option<u64>,
    pub token: Option<String>,
    pub verbose: bool,
}

/// Run the provide command.
pub async fn run(runner: &CliRunner, args: ProvideArgs) -> Result<(), CliError> {
    runner.log_startup("provide");
    let config = runner.config();

    let route = parse_route(&args.route)?;
    let source = SimulatedSource::new(
        route,
        SimulatedSourceConfig {
            interval: Duration::from_millis(args.interval_ms.max(1)),
            steps_per_leg: args.steps,
            repeat: args.repeat,
            ..SimulatedSourceConfig::default()
        },
    )
    .map_err(TrackingError::from)?;
    let remote = runner.remote_channel(args.token)?;

    let coordinator = Arc::new(SessionCoordinator::new(
        args.session_id.clone(),
        source,
        remote,
        config.to_coordinator_config(),
    ));

    let mut events = coordinator.subscribe();
    // Stops the console and logger tasks early when no terminal event will come.
    let cancellation = CancellationToken::new();
    // Fired by the console task when the session fails on its own.
    let failed = CancellationToken::new();

    // Console output runs beside the session and ends on Stopped or Failed.
    let printer = {
        let cancellation = cancellation.clone();
        let failed = failed.clone();
        let verbose = args.verbose;
        tokio::spawn(async move {
            let mut emitted = 0u64;
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => {
                            if let TrackingEvent::LocationEmitted { emit_count, .. } = event {
                                emitted = emit_count;
                            }
                            if let Some(line) = describe_event(&event, verbose) {
                                println!("{}", line);
                            }
                            match event {
                                TrackingEvent::Failed { .. } => {
                                    failed.cancel();
                                    break;
                                }
                                TrackingEvent::Stopped { .. } => break,
                                _ => {}
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Console fell behind tracking events");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            emitted
        })
    };

    let logger = tracing::enabled!(tracing::Level::DEBUG).then(|| {
        spawn_session_logger(
            Arc::clone(&coordinator),
            cancellation.child_token(),
            DEFAULT_LOG_INTERVAL,
        )
    });

    println!("Starting session '{}'...", args.session_id);
    if let Err(e) = coordinator.start().await {
        cancellation.cancel();
        return Err(e.into());
    }
    println!("Press Ctrl-C to stop.");

    tokio::select! {
        _ = wait_for_shutdown(args.duration.map(Duration::from_secs)) => {
            info!("Shutdown requested");
        }
        _ = failed.cancelled() => {}
    }

    let result = if coordinator.state() == SessionState::Failed {
        println!("Session failed; run the command again to retry.");
        Ok(())
    } else {
        match coordinator.stop().await {
            Ok(StopOutcome::Clean) => Ok(()),
            Ok(StopOutcome::RemoteEndFailed(e)) => {
                println!("Warning: the service did not confirm the end of the session: {}", e);
                Ok(())
            }
            Err(e) => {
                cancellation.cancel();
                Err(CliError::from(e))
            }
        }
    };

    // The console task exits once it has printed the terminal event
    let emitted = match printer.await {
        Ok(emitted) => emitted,
        Err(e) => {
            warn!(error = %e, "Console task ended abnormally");
            0
        }
    };
    cancellation.cancel();
    if let Some(logger) = logger {
        if let Err(e) = logger.await {
            warn!(error = %e, "Session logger ended abnormally");
        }
    }

    println!("{} update(s) sent.", emitted);
    info!(
        session_id = %args.session_id,
        emitted,
        "Provider session finished"
    );
    result
}

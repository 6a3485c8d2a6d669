//! Demo command - provider and observer sessions over an in-process hub.
//!
//! Exercises the whole tracking flow without a server: a simulated provider
//! reports to a [`LoopbackHub`], and an observer joined to the same hub
//! prints every position it receives.

use std::sync::Arc;
use std::time::Duration;

use fieldtrack::tracking::{
    LoopbackHub, ObservedPosition, ObserverSession, ProviderPresence, SessionCoordinator,
    SimulatedSource, SimulatedSourceConfig, TrackingError, TrackingEvent,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::common::{describe_event, describe_view, parse_route, wait_for_shutdown};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Route used when `--route` is not given: a short drive through central Delhi.
pub const DEFAULT_DEMO_ROUTE: &str = "28.6315,77.2167;28.6280,77.2190;28.6229,77.2100;28.6129,77.2295";

/// How long to wait for the observer to hear about the stop.
const STOP_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Arguments for the demo command.
pub struct DemoArgs {
    pub session_id: String,
    pub route: Option<String>,
    pub interval_ms: u64,
    pub duration: u64,
    pub verbose: bool,
}

/// Run the demo command.
pub async fn run(runner: &CliRunner, args: DemoArgs) -> Result<(), CliError> {
    runner.log_startup("demo");
    let config = runner.config();

    let route = parse_route(args.route.as_deref().unwrap_or(DEFAULT_DEMO_ROUTE))?;
    let source = SimulatedSource::new(
        route,
        SimulatedSourceConfig {
            interval: Duration::from_millis(args.interval_ms.max(1)),
            ..SimulatedSourceConfig::default()
        },
    )
    .map_err(TrackingError::from)?;
    info!(points = source.point_count(), "Simulated route ready");

    let hub = LoopbackHub::new();
    let provider = Arc::new(SessionCoordinator::new(
        args.session_id.clone(),
        source,
        hub.clone(),
        config.to_coordinator_config(),
    ));
    let observer = ObserverSession::new(
        args.session_id.clone(),
        "demo-customer",
        hub.connect(),
        hub.clone(),
        config.to_observer_config(),
    );

    let cancellation = CancellationToken::new();
    let mut provider_events = provider.subscribe();
    let mut observer_views = observer.subscribe();
    let verbose = args.verbose;

    // Ends once both sides have printed the stop, or on cancellation
    let printer = {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            let mut provider_done = false;
            let mut observer_done = false;
            while !(provider_done && observer_done) {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    event = provider_events.recv(), if !provider_done => match event {
                        Ok(event) => {
                            if let Some(line) = describe_event(&event, verbose) {
                                println!("[provider] {}", line);
                            }
                            provider_done = matches!(
                                event,
                                TrackingEvent::Stopped { .. } | TrackingEvent::Failed { .. }
                            );
                        }
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => provider_done = true,
                    },
                    view = observer_views.recv(), if !observer_done => match view {
                        Ok(view) => {
                            println!("[observer] {}", describe_view(&view));
                            observer_done = view.provider == ProviderPresence::Stopped;
                        }
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => observer_done = true,
                    },
                }
            }
        })
    };

    let initial = observer.join().await?;
    println!(
        "[observer] joined '{}' (provider {})",
        observer.session_id(),
        initial.provider
    );

    if let Err(e) = provider.start().await {
        let _ = observer.leave().await;
        cancellation.cancel();
        join_printer(printer).await;
        return Err(e.into());
    }

    wait_for_shutdown(Some(Duration::from_secs(args.duration))).await;

    let mut stop_watch = observer.subscribe();
    let outcome = provider.stop().await;
    let stopped_view = match &outcome {
        Ok(_) => wait_for_stopped_view(&mut stop_watch, STOP_PROPAGATION_TIMEOUT).await,
        Err(_) => None,
    };
    let final_view = match stopped_view {
        Some(view) => view,
        None => {
            cancellation.cancel();
            observer.view()
        }
    };
    observer.leave().await?;
    join_printer(printer).await;

    outcome?;
    println!();
    println!("Final observer view: {}", describe_view(&final_view));
    info!(session_id = %args.session_id, provider = %final_view.provider, "Demo finished");

    Ok(())
}

/// Wait until the observer reports the provider stopped.
///
/// Returns `None` if the view stream closes or `timeout` passes first.
async fn wait_for_stopped_view(
    views: &mut broadcast::Receiver<ObservedPosition>,
    timeout: Duration,
) -> Option<ObservedPosition> {
    let wait = async {
        loop {
            match views.recv().await {
                Ok(view) if view.provider == ProviderPresence::Stopped => return Some(view),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
    };
    match tokio::time::timeout(timeout, wait).await {
        Ok(view) => view,
        Err(_) => {
            warn!("Observer did not see the provider stop in time");
            None
        }
    }
}

async fn join_printer(printer: tokio::task::JoinHandle<()>) {
    if let Err(e) = printer.await {
        warn!(error = %e, "Console task ended abnormally");
    }
}

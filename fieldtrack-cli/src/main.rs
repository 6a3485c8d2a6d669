//! fieldtrack CLI - Command-line interface
//!
//! Runs provider and observer tracking sessions against a tracking service,
//! or against an in-process hub with `fieldtrack demo`.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};
use fieldtrack::tracking::Coordinate;

use commands::common::parse_coordinate;
use commands::config::ConfigCommands;
use commands::demo::DemoArgs;
use commands::observe::ObserveArgs;
use commands::provide::ProvideArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "fieldtrack")]
#[command(version = fieldtrack::VERSION)]
#[command(about = "Live location tracking for field service jobs", long_about = None)]
struct Cli {
    /// Enable debug-level logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a provider session, replaying a route to the tracking service
    Provide {
        /// Booking/job identifier of the session
        session_id: String,

        /// Route waypoints as "lat,lon;lat,lon;..."
        #[arg(long)]
        route: String,

        /// Milliseconds between simulated position fixes
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Interpolated fixes between consecutive waypoints
        #[arg(long, default_value = "10")]
        steps: u32,

        /// Loop the route instead of stopping at the last waypoint
        #[arg(long)]
        repeat: bool,

        /// Stop automatically after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Bearer token (overrides [remote] bearer_token)
        #[arg(long, env = "FIELDTRACK_TOKEN")]
        token: Option<String>,

        /// Also print suppressed samples and heartbeats
        #[arg(short, long)]
        verbose: bool,
    },

    /// Follow a provider's position through the REST status API
    Observe {
        /// Booking/job identifier of the session
        session_id: String,

        /// Seconds between status polls (overrides [session] status_poll_interval_secs)
        #[arg(long)]
        interval: Option<u64>,

        /// Stop automatically after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Bearer token (overrides [remote] bearer_token)
        #[arg(long, env = "FIELDTRACK_TOKEN")]
        token: Option<String>,
    },

    /// Run a provider and an observer against an in-process hub
    Demo {
        /// Session identifier shared by both sides
        #[arg(long, default_value = "demo-job")]
        session_id: String,

        /// Route waypoints as "lat,lon;lat,lon;..." (defaults to a built-in route)
        #[arg(long)]
        route: Option<String>,

        /// Milliseconds between simulated position fixes
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Seconds to run before stopping
        #[arg(long, default_value = "30")]
        duration: u64,

        /// Also print suppressed samples and heartbeats
        #[arg(short, long)]
        verbose: bool,
    },

    /// Great-circle distance and bearing between two points
    Distance {
        /// Start point as "lat,lon"
        #[arg(value_parser = parse_coordinate, allow_hyphen_values = true)]
        from: Coordinate,

        /// End point as "lat,lon"
        #[arg(value_parser = parse_coordinate, allow_hyphen_values = true)]
        to: Coordinate,
    },

    /// View and manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        // Commands that don't need logging or the network
        Commands::Distance { from, to } => commands::distance::run(from, to),
        Commands::Config { command } => commands::config::run(command),

        command => run_session_command(command, cli.debug).await,
    };

    if let Err(e) = result {
        e.exit();
    }
}

/// Run a command that needs config and logging.
async fn run_session_command(command: Commands, debug: bool) -> Result<(), CliError> {
    let runner = CliRunner::with_debug(debug)?;

    match command {
        Commands::Provide {
            session_id,
            route,
            interval_ms,
            steps,
            repeat,
            duration,
            token,
            verbose,
        } => {
            commands::provide::run(
                &runner,
                ProvideArgs {
                    session_id,
                    route,
                    interval_ms,
                    steps,
                    repeat,
                    duration,
                    token,
                    verbose,
                },
            )
            .await
        }

        Commands::Observe {
            session_id,
            interval,
            duration,
            token,
        } => {
            commands::observe::run(
                &runner,
                ObserveArgs {
                    session_id,
                    interval_secs: interval,
                    duration,
                    token,
                },
            )
            .await
        }

        Commands::Demo {
            session_id,
            route,
            interval_ms,
            duration,
            verbose,
        } => {
            commands::demo::run(
                &runner,
                DemoArgs {
                    session_id,
                    route,
                    interval_ms,
                    duration,
                    verbose,
                },
            )
            .await
        }

        Commands::Distance { .. } | Commands::Config { .. } => Ok(()),
    }
}

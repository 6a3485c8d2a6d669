//! Configuration management CLI commands.
//!
//! Provides `config init`, `config list` and `config path` for creating and
//! inspecting `~/.fieldtrack/config.ini`.

use clap::Subcommand;
use fieldtrack::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Create the configuration file with default values
    Init {
        /// Overwrite an existing file with defaults
        #[arg(long)]
        force: bool,
    },

    /// List all configuration settings
    List,

    /// Show the configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init { force } => run_init(force),
        ConfigCommands::List => run_list(),
        ConfigCommands::Path => run_path(),
    }
}

/// Create the config file.
fn run_init(force: bool) -> Result<(), CliError> {
    let path = config_file_path();

    if path.exists() && !force {
        println!("Configuration already exists at {}", path.display());
        println!("Use --force to reset it to defaults.");
        return Ok(());
    }

    ConfigFile::default().save_to(&path)?;
    println!("Created {}", path.display());
    Ok(())
}

/// List all configuration settings.
fn run_list() -> Result<(), CliError> {
    let config = ConfigFile::load()?;

    println!("Configuration Settings");
    println!("======================");

    for (section, entries) in settings(&config) {
        println!();
        println!("[{}]", section);
        for (key, value) in entries {
            if value.is_empty() {
                println!("  {} = (not set)", key);
            } else {
                println!("  {} = {}", key, value);
            }
        }
    }

    Ok(())
}

/// Show the configuration file path.
fn run_path() -> Result<(), CliError> {
    println!("{}", config_file_path().display());
    Ok(())
}

/// Settings grouped by INI section, with the token masked.
fn settings(config: &ConfigFile) -> Vec<(&'static str, Vec<(&'static str, String)>)> {
    let token = match config.remote.bearer_token.as_deref() {
        Some(t) if t.chars().count() > 4 => {
            let tail: String = t.chars().skip(t.chars().count() - 4).collect();
            format!("****{}", tail)
        }
        Some(_) => "****".to_string(),
        None => String::new(),
    };

    vec![
        (
            "remote",
            vec![
                ("base_url", config.remote.base_url.clone()),
                ("bearer_token", token),
                (
                    "request_timeout_secs",
                    config.remote.request_timeout_secs.to_string(),
                ),
            ],
        ),
        (
            "policy",
            vec![
                ("min_interval_ms", config.policy.min_interval_ms.to_string()),
                ("min_distance_m", config.policy.min_distance_m.to_string()),
                (
                    "max_emits_per_window",
                    config.policy.max_emits_per_window.to_string(),
                ),
                ("window_ms", config.policy.window_ms.to_string()),
            ],
        ),
        (
            "session",
            vec![
                (
                    "initial_fix_timeout_ms",
                    config.session.initial_fix_timeout_ms.to_string(),
                ),
                (
                    "heartbeat_interval_secs",
                    config.session.heartbeat_interval_secs.to_string(),
                ),
                (
                    "max_consecutive_watch_errors",
                    config.session.max_consecutive_watch_errors.to_string(),
                ),
                (
                    "status_poll_interval_secs",
                    config.session.status_poll_interval_secs.to_string(),
                ),
            ],
        ),
        (
            "logging",
            vec![("file", config.logging.file.display().to_string())],
        ),
    ]
}

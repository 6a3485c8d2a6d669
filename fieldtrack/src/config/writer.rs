//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let bearer_token = config.remote.bearer_token.as_deref().unwrap_or("");

    format!(
        r#"[remote]
; Tracking service API base URL. Routes are appended as /tracking/{{id}}/...
base_url = {}
; Bearer token sent as "Authorization: Bearer <token>" (empty = none)
bearer_token = {}
; Timeout for each request in seconds (default: 10)
request_timeout_secs = {}

[policy]
; Update gate: a position is sent only if ALL of these hold
; (the first fix of a session is always sent)
; Minimum time between sent updates in milliseconds (default: 5000)
min_interval_ms = {}
; Minimum movement between sent updates in meters (default: 10)
min_distance_m = {}
; Maximum sent updates per rate window (default: 12)
max_emits_per_window = {}
; Rate window length in milliseconds (default: 60000)
window_ms = {}

[session]
; Deadline for the initial position fix in milliseconds (default: 10000)
initial_fix_timeout_ms = {}
; Re-send the last position every N seconds while tracking (0 = disabled, default: 30)
heartbeat_interval_secs = {}
; Consecutive position errors before the session fails (default: 3)
max_consecutive_watch_errors = {}
; Observer REST status poll period in seconds (0 = disabled, default: 15)
status_poll_interval_secs = {}

[logging]
; Log file location
file = {}
"#,
        config.remote.base_url,
        bearer_token,
        config.remote.request_timeout_secs,
        config.policy.min_interval_ms,
        config.policy.min_distance_m,
        config.policy.max_emits_per_window,
        config.policy.window_ms,
        config.session.initial_fix_timeout_ms,
        config.session.heartbeat_interval_secs,
        config.session.max_consecutive_watch_errors,
        config.session.status_poll_interval_secs,
        path_to_string(&config.logging.file),
    )
}

/// Render a path for the config file, abbreviating the home directory as `~`.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ini::Ini;

    #[test]
    fn test_output_is_valid_ini_with_all_sections() {
        let content = to_config_string(&ConfigFile::default());
        let ini = Ini::load_from_str(&content).unwrap();

        for section in ["remote", "policy", "session", "logging"] {
            assert!(ini.section(Some(section)).is_some(), "missing [{}]", section);
        }
        assert_eq!(
            ini.section(Some("policy"))
                .and_then(|s| s.get("max_emits_per_window")),
            Some("12")
        );
    }

    #[test]
    fn test_home_abbreviated() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                path_to_string(&home.join(".fieldtrack/logs/fieldtrack.log")),
                "~/.fieldtrack/logs/fieldtrack.log"
            );
        }
    }
}

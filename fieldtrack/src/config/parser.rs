//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module contains the `parse_ini()` function and its helpers.
//! It is the single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::path::PathBuf;
use std::str::FromStr;

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [remote] section
    if let Some(section) = ini.section(Some("remote")) {
        if let Some(v) = section.get("base_url") {
            let v = v.trim();
            if !(v.starts_with("http://") || v.starts_with("https://")) {
                return Err(invalid(
                    "remote",
                    "base_url",
                    v,
                    "must start with http:// or https://",
                ));
            }
            config.remote.base_url = v.to_string();
        }
        if let Some(v) = section.get("bearer_token") {
            let v = v.trim();
            config.remote.bearer_token = (!v.is_empty()).then(|| v.to_string());
        }
        if let Some(v) = section.get("request_timeout_secs") {
            config.remote.request_timeout_secs = parse_positive(
                "remote",
                "request_timeout_secs",
                v,
                "must be a positive integer (seconds)",
            )?;
        }
    }

    // [policy] section
    if let Some(section) = ini.section(Some("policy")) {
        if let Some(v) = section.get("min_interval_ms") {
            config.policy.min_interval_ms = parse_value(
                "policy",
                "min_interval_ms",
                v,
                "must be a non-negative integer (milliseconds)",
            )?;
        }
        if let Some(v) = section.get("min_distance_m") {
            let meters: f64 =
                parse_value("policy", "min_distance_m", v, "must be a number (meters)")?;
            if !meters.is_finite() || meters < 0.0 {
                return Err(invalid(
                    "policy",
                    "min_distance_m",
                    v,
                    "must be a non-negative number (meters)",
                ));
            }
            config.policy.min_distance_m = meters;
        }
        if let Some(v) = section.get("max_emits_per_window") {
            config.policy.max_emits_per_window = parse_positive(
                "policy",
                "max_emits_per_window",
                v,
                "must be a positive integer",
            )?;
        }
        if let Some(v) = section.get("window_ms") {
            config.policy.window_ms = parse_positive(
                "policy",
                "window_ms",
                v,
                "must be a positive integer (milliseconds)",
            )?;
        }
    }

    // [session] section
    if let Some(section) = ini.section(Some("session")) {
        if let Some(v) = section.get("initial_fix_timeout_ms") {
            config.session.initial_fix_timeout_ms = parse_positive(
                "session",
                "initial_fix_timeout_ms",
                v,
                "must be a positive integer (milliseconds)",
            )?;
        }
        if let Some(v) = section.get("heartbeat_interval_secs") {
            config.session.heartbeat_interval_secs = parse_value(
                "session",
                "heartbeat_interval_secs",
                v,
                "must be a non-negative integer (seconds, 0 = disabled)",
            )?;
        }
        if let Some(v) = section.get("max_consecutive_watch_errors") {
            config.session.max_consecutive_watch_errors = parse_positive(
                "session",
                "max_consecutive_watch_errors",
                v,
                "must be a positive integer",
            )?;
        }
        if let Some(v) = section.get("status_poll_interval_secs") {
            config.session.status_poll_interval_secs = parse_value(
                "session",
                "status_poll_interval_secs",
                v,
                "must be a non-negative integer (seconds, 0 = disabled)",
            )?;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = expand_tilde(v);
            }
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

/// Parse an integer that must be greater than zero.
fn parse_positive<T>(section: &str, key: &str, value: &str, reason: &str) -> Result<T, ConfigFileError>
where
    T: FromStr + PartialOrd + Default,
{
    let parsed: T = parse_value(section, key, value, reason)?;
    if parsed <= T::default() {
        return Err(invalid(section, key, value, reason));
    }
    Ok(parsed)
}

/// Expand a leading `~/` to the user's home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<ConfigFile, ConfigFileError> {
        let ini = Ini::load_from_str(content).unwrap();
        parse_ini(&ini)
    }

    #[test]
    fn test_empty_ini_gives_defaults() {
        assert_eq!(parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_overlay_values() {
        let config = parse(
            r#"
[remote]
base_url = https://track.example.com/api
bearer_token = abc123
request_timeout_secs = 5

[policy]
min_interval_ms = 2000
min_distance_m = 15.5
max_emits_per_window = 6
window_ms = 30000

[session]
heartbeat_interval_secs = 0
max_consecutive_watch_errors = 5
"#,
        )
        .unwrap();

        assert_eq!(config.remote.base_url, "https://track.example.com/api");
        assert_eq!(config.remote.bearer_token.as_deref(), Some("abc123"));
        assert_eq!(config.remote.request_timeout_secs, 5);
        assert_eq!(config.policy.min_interval_ms, 2_000);
        assert_eq!(config.policy.min_distance_m, 15.5);
        assert_eq!(config.policy.max_emits_per_window, 6);
        assert_eq!(config.policy.window_ms, 30_000);
        assert_eq!(config.session.heartbeat_interval_secs, 0);
        assert_eq!(config.session.max_consecutive_watch_errors, 5);
        // Untouched keys keep defaults
        assert_eq!(
            config.session.initial_fix_timeout_ms,
            ConfigFile::default().session.initial_fix_timeout_ms
        );
    }

    #[test]
    fn test_empty_token_is_none() {
        let config = parse("[remote]\nbearer_token =\n").unwrap();
        assert!(config.remote.bearer_token.is_none());
    }

    #[test]
    fn test_invalid_base_url() {
        let err = parse("[remote]\nbase_url = ftp://example.com\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref key, .. } if key == "base_url"
        ));
    }

    #[test]
    fn test_negative_distance_rejected() {
        let err = parse("[policy]\nmin_distance_m = -1\n").unwrap_err();
        assert!(err.to_string().contains("policy.min_distance_m"));
    }

    #[test]
    fn test_zero_where_positive_required() {
        assert!(parse("[policy]\nwindow_ms = 0\n").is_err());
        assert!(parse("[session]\nmax_consecutive_watch_errors = 0\n").is_err());
        assert!(parse("[remote]\nrequest_timeout_secs = 0\n").is_err());
    }

    #[test]
    fn test_non_numeric_rejected() {
        let err = parse("[session]\nheartbeat_interval_secs = often\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref value, .. } if value == "often"
        ));
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/logs/fieldtrack.log");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("logs/fieldtrack.log"));
        }
        assert_eq!(expand_tilde("/var/log/x.log"), PathBuf::from("/var/log/x.log"));
    }
}

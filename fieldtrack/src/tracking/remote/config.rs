//! Configuration for the remote tracking service client.

use std::time::Duration;

/// Default API base URL (local development backend).
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Configuration for [`super::HttpRemoteChannel`].
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// API base URL; tracking routes are appended as `/tracking/{id}/...`.
    pub base_url: String,

    /// Bearer token sent with every request, if any.
    pub bearer_token: Option<String>,

    /// Timeout applied to each HTTP request.
    pub request_timeout: Duration,
}

impl RemoteConfig {
    /// Create a config for `base_url` with default timeout and no credential.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the bearer token.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            bearer_token: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RemoteConfig::default();
        assert_eq!(config.base_url, "http://localhost:5000/api");
        assert!(config.bearer_token.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builder() {
        let config = RemoteConfig::new("https://api.example.com").with_bearer_token("abc");
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.bearer_token.as_deref(), Some("abc"));
    }
}

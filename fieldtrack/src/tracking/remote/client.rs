//! Remote channel traits and the HTTP implementation.
//!
//! [`RemoteChannel`] covers the REST side of the tracking service and
//! [`PushChannel`] the real-time event stream. Both are injected into the
//! coordinator and observer, so tests and the loopback hub can stand in for
//! the real service.

use std::future::Future;
use std::sync::Arc;

use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::config::RemoteConfig;
use super::error::RemoteError;
use super::events::{InboundEvent, LocationBody, OutboundEvent, TrackingStatus};
use crate::tracking::geo::Coordinate;
use crate::tracking::state::Role;

/// REST operations of the tracking service.
pub trait RemoteChannel: Send + Sync {
    /// `POST /tracking/{id}/start` with the initial fix.
    fn begin_session(
        &self,
        session_id: &str,
        location: Coordinate,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// `PUT /tracking/{id}/location`.
    fn update_location(
        &self,
        session_id: &str,
        location: Coordinate,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// `POST /tracking/{id}/stop`.
    fn end_session(&self, session_id: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// `GET /tracking/{id}/status`.
    fn fetch_status(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<TrackingStatus, RemoteError>> + Send;
}

/// Real-time event stream of the tracking service.
pub trait PushChannel: Send + Sync {
    /// Send `joinTracking` and return the stream of events for the session.
    fn join(
        &self,
        session_id: &str,
        role: Role,
        participant_id: &str,
    ) -> impl Future<Output = Result<mpsc::Receiver<InboundEvent>, RemoteError>> + Send;

    /// Send `leaveTracking`; the joined stream closes afterwards.
    fn leave(&self, session_id: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Send an arbitrary outbound event (e.g. a provider `locationUpdate`).
    fn publish(&self, event: OutboundEvent) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// Supplies the bearer credential for each request.
///
/// Login and token refresh live outside this crate; implementors hand back
/// whatever token is current.
pub trait CredentialProvider: Send + Sync {
    /// Current bearer token, or `None` to send the request unauthenticated.
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// HTTP client for the tracking service REST API.
///
/// Uses a reusable `reqwest::Client` with connection pooling and a
/// per-request timeout.
#[derive(Clone)]
pub struct HttpRemoteChannel {
    http: reqwest::Client,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpRemoteChannel {
    /// Create a client using the token from `config`.
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let credentials = Arc::new(StaticToken(config.bearer_token.clone()));
        Self::with_credentials(config, credentials)
    }

    /// Create a client with an external credential provider.
    pub fn with_credentials(
        config: &RemoteConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, RemoteError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| RemoteError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl(config.base_url.clone()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    /// Build `{base}/tracking/{session_id}/{action}` with the id percent-encoded.
    pub fn endpoint(&self, session_id: &str, action: &str) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["tracking", session_id, action]);
        Ok(url)
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<reqwest::Response, RemoteError> {
        trace!(%method, %url, "Tracking request starting");

        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(token) = self.credentials.bearer_token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            warn!(
                %method,
                %url,
                error = %e,
                is_connect = e.is_connect(),
                is_timeout = e.is_timeout(),
                "Tracking request failed"
            );
            if e.is_timeout() {
                RemoteError::Timeout
            } else {
                RemoteError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        debug!(%method, %url, status = status.as_u16(), "Tracking response received");

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
            });
        }

        Ok(response)
    }
}

impl RemoteChannel for HttpRemoteChannel {
    async fn begin_session(&self, session_id: &str, location: Coordinate) -> Result<(), RemoteError> {
        let url = self.endpoint(session_id, "start")?;
        self.send(Method::POST, url, Some(&LocationBody::from(location)))
            .await
            .map(|_| ())
    }

    async fn update_location(
        &self,
        session_id: &str,
        location: Coordinate,
    ) -> Result<(), RemoteError> {
        let url = self.endpoint(session_id, "location")?;
        self.send(Method::PUT, url, Some(&LocationBody::from(location)))
            .await
            .map(|_| ())
    }

    async fn end_session(&self, session_id: &str) -> Result<(), RemoteError> {
        let url = self.endpoint(session_id, "stop")?;
        self.send(Method::POST, url, Some(&serde_json::json!({})))
            .await
            .map(|_| ())
    }

    async fn fetch_status(&self, session_id: &str) -> Result<TrackingStatus, RemoteError> {
        let url = self.endpoint(session_id, "status")?;
        let response = self.send::<()>(Method::GET, url, None).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteError::HttpError(format!("Failed to read response: {}", e)))?;

        serde_json::from_slice(&bytes).map_err(|e| RemoteError::JsonError(e.to_string()))
    }
}

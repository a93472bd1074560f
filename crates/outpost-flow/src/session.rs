//! Session-bound transport for the flow executor API
//!
//! [`FlowSession`] keeps a private cookie jar, so one session must only ever serve one
//! flow run. It does not implement `Clone`.

use std::time::Duration;

use async_trait::async_trait;
use outpost_protocol::{AccessCheckResult, Challenge, ChallengeResponse};
use reqwest::{Response, StatusCode};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::{sanitize_base_url, sanitize_headers, SessionConfig};
use crate::error::SessionError;

/// Name of the query parameter carrying the flow query-state
pub const QUERY_PARAM: &str = "query";

/// A challenge received from the flow executor
#[derive(Debug)]
pub struct Exchange {
    /// The decoded challenge
    pub challenge: Challenge,
    /// Query-state echoed by the server on the final response URL, if any
    pub query: Option<String>,
    /// Failure reported alongside a decodable challenge (e.g. an error status)
    pub error: Option<SessionError>,
}

/// Operations of the remote flow API used by [`crate::FlowExecutor`]
#[async_trait]
pub trait FlowTransport: Send + Sync {
    /// Fetch the current challenge of a flow
    async fn get_challenge(&self, flow_slug: &str, query: &str) -> Result<Exchange, SessionError>;

    /// Submit a response to the current challenge
    async fn solve_challenge(
        &self,
        flow_slug: &str,
        query: &str,
        response: &ChallengeResponse,
    ) -> Result<Exchange, SessionError>;

    /// Check whether the session may access an application
    async fn check_access(&self, app_slug: &str) -> Result<AccessCheckResult, SessionError>;
}

/// HTTP session with its own cookie jar
#[derive(Debug)]
pub struct FlowSession {
    http: reqwest::Client,
    base_url: Url,
}

impl FlowSession {
    /// Create a new session
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let base_url = sanitize_base_url(&config.base_url)?;
        let headers = sanitize_headers(&config.headers)?;

        info!(
            host = base_url.host_str().unwrap_or("unknown"),
            "Creating flow session"
        );
        if config.insecure_skip_verify {
            warn!("TLS certificate verification is disabled");
        }

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()?;

        Ok(Self { http, base_url })
    }

    /// Get the normalized base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SessionError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SessionError::InvalidBaseUrl("cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments)
            .push("");
        Ok(url)
    }

    fn executor_url(&self, flow_slug: &str, query: &str) -> Result<Url, SessionError> {
        let mut url = self.endpoint(&["api", "v3", "flows", "executor", flow_slug])?;
        url.query_pairs_mut().append_pair(QUERY_PARAM, query);
        Ok(url)
    }

    async fn read_exchange(response: Response) -> Result<Exchange, SessionError> {
        let status = response.status();
        let query = echoed_query(response.url());
        let body = response.text().await?;

        match serde_json::from_str::<Challenge>(&body) {
            Ok(challenge) => {
                let error = if status.is_success() {
                    None
                } else {
                    error!(%status, "Flow executor returned an error status");
                    Some(status_error(status, &body))
                };
                Ok(Exchange {
                    challenge,
                    query,
                    error,
                })
            }
            Err(_) if !status.is_success() => {
                error!(%status, "Flow executor returned an undecodable error");
                Err(status_error(status, &body))
            }
            Err(e) => Err(SessionError::Json(e)),
        }
    }
}

#[async_trait]
impl FlowTransport for FlowSession {
    #[instrument(skip(self, query))]
    async fn get_challenge(&self, flow_slug: &str, query: &str) -> Result<Exchange, SessionError> {
        let url = self.executor_url(flow_slug, query)?;
        debug!(%url, "Fetching challenge");
        let response = self.http.get(url).send().await?;
        Self::read_exchange(response).await
    }

    #[instrument(skip(self, query, response), fields(component = %response.kind()))]
    async fn solve_challenge(
        &self,
        flow_slug: &str,
        query: &str,
        response: &ChallengeResponse,
    ) -> Result<Exchange, SessionError> {
        let url = self.executor_url(flow_slug, query)?;
        debug!(%url, "Submitting challenge response");
        let reply = self.http.post(url).json(response).send().await?;
        Self::read_exchange(reply).await
    }

    #[instrument(skip(self))]
    async fn check_access(&self, app_slug: &str) -> Result<AccessCheckResult, SessionError> {
        let url = self.endpoint(&["api", "v3", "core", "applications", app_slug, "check_access"])?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<AccessCheckResult>(&body) {
            Ok(result) => {
                if !status.is_success() {
                    warn!(%status, "Access check returned a result with an error status");
                }
                Ok(result)
            }
            Err(_) if !status.is_success() => Err(status_error(status, &body)),
            Err(e) => Err(SessionError::Json(e)),
        }
    }
}

fn echoed_query(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == QUERY_PARAM)
        .map(|(_, v)| v.into_owned())
}

fn status_error(status: StatusCode, body: &str) -> SessionError {
    SessionError::Status(status.as_u16(), truncate(body, 400))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

//! Session configuration
//!
//! Provides:
//! - [`SessionConfig`] with caller-supplied settings and fixed defaults
//! - Base URL and header sanitization

use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;
use url::Url;

use crate::error::SessionError;

/// Request timeout used unless the caller sets one
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Configuration for a [`crate::FlowSession`]
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the authority (e.g. "https://auth.example.com")
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User-Agent sent with every request
    pub user_agent: String,
    /// Skip TLS certificate verification
    pub insecure_skip_verify: bool,
    /// Additional HTTP headers
    pub headers: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            user_agent: default_user_agent(),
            insecure_skip_verify: false,
            headers: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    /// Create a config for the given base URL with default settings
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Add an HTTP header sent with every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// User-Agent identifying the outpost
pub fn default_user_agent() -> String {
    format!("goauthentik.io/outpost/{}", env!("CARGO_PKG_VERSION"))
}

/// Sanitizes and normalizes the authority base URL
///
/// Rules:
/// - Trims whitespace
/// - Rejects control chars / newlines
/// - Requires http or https
/// - Rejects userinfo
/// - Drops query and fragment, trims trailing slashes from the path
pub fn sanitize_base_url(input: &str) -> Result<Url, SessionError> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(SessionError::InvalidBaseUrl("empty".to_string()));
    }
    if raw.chars().any(|c| c.is_control()) {
        return Err(SessionError::InvalidBaseUrl(
            "contains control characters".to_string(),
        ));
    }
    let mut url = Url::parse(raw).map_err(|e| SessionError::InvalidBaseUrl(e.to_string()))?;

    match url.scheme() {
        "https" | "http" => {}
        other => {
            return Err(SessionError::InvalidBaseUrl(format!(
                "unsupported scheme: {other}"
            )))
        }
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(SessionError::InvalidBaseUrl(
            "must not include userinfo".to_string(),
        ));
    }

    url.set_query(None);
    url.set_fragment(None);
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);

    debug!(%url, "Normalized base url");
    Ok(url)
}

/// Validate configured headers and convert them into a [`HeaderMap`]
///
/// - Header names must be token-like
/// - Header values must not contain control chars/newlines
pub fn sanitize_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap, SessionError> {
    let mut out = HeaderMap::new();
    for (k, v) in headers {
        let name = k.trim();
        let val = v.trim();

        if name.is_empty() {
            return Err(SessionError::InvalidHeaders(
                "empty header name".to_string(),
            ));
        }
        if name.chars().any(|c| c.is_control()) || val.chars().any(|c| c.is_control()) {
            return Err(SessionError::InvalidHeaders(format!(
                "control characters in header: {name}"
            )));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(SessionError::InvalidHeaders(format!(
                "invalid header name: {name}"
            )));
        }
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| SessionError::InvalidHeaders(format!("bad header name: {name}")))?;
        let header_value = HeaderValue::from_str(val)
            .map_err(|_| SessionError::InvalidHeaders(format!("bad header value for {name}")))?;
        out.insert(header_name, header_value);
    }
    Ok(out)
}

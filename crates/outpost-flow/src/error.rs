//! Error types for flow sessions and flow runs

use std::fmt;
use std::num::ParseIntError;

use thiserror::Error;

/// Errors raised by the HTTP session talking to the flow executor API
#[derive(Debug, Error)]
pub enum SessionError {
    /// Invalid base URL configuration
    #[error("invalid base_url: {0}")]
    InvalidBaseUrl(String),
    /// Invalid headers configuration
    #[error("invalid headers: {0}")]
    InvalidHeaders(String),
    /// HTTP request failed
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// Server answered with a non-success status
    #[error("server error {0}: {1}")]
    Status(u16, String),
    /// Body could not be decoded
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Network operation an exchange error happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Fetching the current challenge
    GetChallenge,
    /// Submitting a challenge response
    SubmitChallenge,
    /// Checking application access
    CheckAccess,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::GetChallenge => write!(f, "get challenge"),
            Operation::SubmitChallenge => write!(f, "submit challenge"),
            Operation::CheckAccess => write!(f, "check access"),
        }
    }
}

/// Terminal failure of a flow run. The run is abandoned and must be restarted fresh.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Transport or decoding failure
    #[error("failed to {operation}: {source}")]
    Exchange {
        /// Operation that failed
        operation: Operation,
        /// Underlying session error
        #[source]
        source: SessionError,
    },

    /// The flow denied access
    #[error("got ak-stage-access-denied: {}", .message.as_deref().unwrap_or("no reason given"))]
    AccessDenied {
        /// Reason given by the server
        message: Option<String>,
    },

    /// Challenge this client cannot answer
    #[error("unsupported challenge {component}: {reason}")]
    UnsupportedChallenge {
        /// Component of the challenge
        component: String,
        /// Why it cannot be answered
        reason: String,
    },

    /// An expected field had the wrong format
    #[error("failed to convert {field} {value:?} to int")]
    Format {
        /// Field name
        field: &'static str,
        /// Offending value
        value: String,
        /// Parse failure
        #[source]
        source: ParseIntError,
    },

    /// The server rejected the submitted response
    #[error("flow error {field}: {message}")]
    Validation {
        /// Field the error is attached to
        field: String,
        /// Error message
        message: String,
    },

    /// The flow did not finish within the exchange bound
    #[error("exceeded stage recursion depth of {depth}")]
    DepthExceeded {
        /// Exchanges performed
        depth: u32,
    },
}

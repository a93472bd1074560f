//! Outpost flow executor
//!
//! Drives a remote, server-orchestrated authentication flow to completion on behalf of a
//! user: identification, password and Duo authenticator validation are answered from an
//! [`Answers`] table; everything else fails closed.
//!
//! # Features
//! - Bounded solve loop ([`MAX_DEPTH`] exchanges) with typed, terminal errors
//! - Cookie-bound [`FlowSession`] transport, one per run
//! - Pluggable [`FlowTransport`] for custom transports and tests
//! - Application access checks
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use outpost_flow::{Answers, FlowExecutor, SessionConfig};
//! use outpost_protocol::StageKind;
//!
//! let config = SessionConfig::new("https://auth.example.com");
//! let mut executor = FlowExecutor::new("default-authentication-flow", &config)?
//!     .with_answers(
//!         Answers::new()
//!             .with(StageKind::Identification, "alice")
//!             .with(StageKind::Password, "hunter2"),
//!     );
//! executor.add_query_param("goauthentik.io/outpost/ldap", "true");
//!
//! executor.execute().await?;
//! let granted = executor.check_application_access("billing").await?;
//! # let _ = granted;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod answers;
pub mod config;
pub mod error;
pub mod executor;
pub mod session;

pub use answers::Answers;
pub use config::SessionConfig;
pub use error::{FlowError, Operation, SessionError};
pub use executor::{Completion, FlowExecutor, MAX_DEPTH};
pub use session::{Exchange, FlowSession, FlowTransport};

//! Flow executor
//!
//! Drives a remote flow to completion: fetch the current challenge, answer it, submit, and
//! repeat until the flow redirects (success) or fails. Every failure is terminal for the run.

use outpost_protocol::{
    Challenge, ChallengeResponse, DeviceClass, Stage, StageKind, COMPONENT_AUTHENTICATOR_VALIDATE,
};
use tracing::{debug, info, instrument, warn};

use crate::answers::Answers;
use crate::config::SessionConfig;
use crate::error::{FlowError, Operation, SessionError};
use crate::session::{Exchange, FlowSession, FlowTransport};

/// Maximum number of fetch/submit exchanges in one run
pub const MAX_DEPTH: u32 = 10;

/// Successful end of a flow run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Number of fetch/submit exchanges performed
    pub exchanges: u32,
    /// Where the flow redirected to
    pub redirect_to: Option<String>,
}

/// Executes one attempt of a flow. Create a new executor for every attempt.
#[derive(Debug)]
pub struct FlowExecutor<T = FlowSession> {
    flow_slug: String,
    query: String,
    answers: Answers,
    transport: T,
}

impl FlowExecutor<FlowSession> {
    /// Create an executor with a fresh session
    pub fn new(flow_slug: impl Into<String>, config: &SessionConfig) -> Result<Self, SessionError> {
        Ok(Self::with_transport(flow_slug, FlowSession::new(config)?))
    }
}

impl<T: FlowTransport> FlowExecutor<T> {
    /// Create an executor over an existing transport
    pub fn with_transport(flow_slug: impl Into<String>, transport: T) -> Self {
        Self {
            flow_slug: flow_slug.into(),
            query: String::new(),
            answers: Answers::new(),
            transport,
        }
    }

    /// Replace the answer table
    pub fn with_answers(mut self, answers: Answers) -> Self {
        self.answers = answers;
        self
    }

    /// Append a parameter to the query-state sent with every exchange
    pub fn add_query_param(&mut self, key: &str, value: &str) {
        let mut serializer = url::form_urlencoded::Serializer::new(std::mem::take(&mut self.query));
        serializer.append_pair(key, value);
        self.query = serializer.finish();
    }

    /// Slug of the flow being executed
    pub fn flow_slug(&self) -> &str {
        &self.flow_slug
    }

    /// Current query-state, form-urlencoded
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Check whether the current session may access an application.
    ///
    /// A failing policy is a normal `Ok(false)`; errors are transport or decoding failures.
    #[instrument(skip(self), fields(flow = %self.flow_slug))]
    pub async fn check_application_access(&self, app_slug: &str) -> Result<bool, FlowError> {
        let result = self
            .transport
            .check_access(app_slug)
            .await
            .map_err(|source| FlowError::Exchange {
                operation: Operation::CheckAccess,
                source,
            })?;

        if !result.passing {
            info!(messages = ?result.messages, "Access denied for user");
            return Ok(false);
        }
        info!("User has access");
        Ok(true)
    }

    /// Run the flow until it redirects or fails
    #[instrument(skip(self), fields(flow = %self.flow_slug))]
    pub async fn execute(&mut self) -> Result<Completion, FlowError> {
        let mut depth: u32 = 1;
        loop {
            let fetched = self
                .transport
                .get_challenge(&self.flow_slug, &self.query)
                .await
                .map_err(|source| FlowError::Exchange {
                    operation: Operation::GetChallenge,
                    source,
                })?;
            let challenge = self.accept(fetched, Operation::GetChallenge)?;
            debug!(
                depth,
                component = %challenge.component(),
                challenge_type = %challenge.challenge_type,
                "Got challenge"
            );

            let response = self.build_response(&challenge)?;

            let submitted = self
                .transport
                .solve_challenge(&self.flow_slug, &self.query, &response)
                .await
                .map_err(|source| FlowError::Exchange {
                    operation: Operation::SubmitChallenge,
                    source,
                })?;
            let Exchange {
                challenge,
                query,
                error,
            } = submitted;
            self.adopt_query(query);
            debug!(
                depth,
                component = %challenge.component(),
                challenge_type = %challenge.challenge_type,
                "Got response"
            );

            if let Stage::AccessDenied(denied) = challenge.stage {
                warn!(depth, "Flow denied access");
                return Err(FlowError::AccessDenied {
                    message: denied.error_message,
                });
            }
            if challenge.is_redirect() {
                info!(depth, to = ?challenge.redirect_to, "Flow completed");
                return Ok(Completion {
                    exchanges: depth,
                    redirect_to: challenge.redirect_to,
                });
            }
            if let Some(source) = error {
                return Err(FlowError::Exchange {
                    operation: Operation::SubmitChallenge,
                    source,
                });
            }
            if let Some((field, detail)) = challenge.first_response_error() {
                return Err(FlowError::Validation {
                    field: field.to_string(),
                    message: detail.string.clone(),
                });
            }
            if depth >= MAX_DEPTH {
                return Err(FlowError::DepthExceeded { depth });
            }
            depth += 1;
        }
    }

    /// Take the challenge out of a fetch. A denial is terminal even when the fetch also
    /// reported an error; any other reported error fails the exchange.
    fn accept(&mut self, exchange: Exchange, operation: Operation) -> Result<Challenge, FlowError> {
        if let Stage::AccessDenied(denied) = &exchange.challenge.stage {
            warn!("Flow denied access");
            return Err(FlowError::AccessDenied {
                message: denied.error_message.clone(),
            });
        }
        if let Some(source) = exchange.error {
            return Err(FlowError::Exchange { operation, source });
        }
        self.adopt_query(exchange.query);
        Ok(exchange.challenge)
    }

    fn adopt_query(&mut self, query: Option<String>) {
        if let Some(query) = query {
            if query != self.query {
                debug!(%query, "Server updated query-state");
                self.query = query;
            }
        }
    }

    fn build_response(&self, challenge: &Challenge) -> Result<ChallengeResponse, FlowError> {
        match &challenge.stage {
            Stage::Identification(_) => Ok(ChallengeResponse::Identification {
                uid_field: self.answers.answer(&StageKind::Identification).to_string(),
            }),
            Stage::Password(_) => Ok(ChallengeResponse::Password {
                password: self.answers.answer(&StageKind::Password).to_string(),
            }),
            Stage::AuthenticatorValidate(inner) => {
                // Duo is the only device class we can answer for
                let device = inner.device(DeviceClass::Duo).ok_or_else(|| {
                    FlowError::UnsupportedChallenge {
                        component: COMPONENT_AUTHENTICATOR_VALIDATE.to_string(),
                        reason: format!(
                            "no duo device offered, got {:?}",
                            inner.device_classes()
                        ),
                    }
                })?;
                let duo = device
                    .device_uid
                    .parse::<i32>()
                    .map_err(|source| FlowError::Format {
                        field: "device_uid",
                        value: device.device_uid.clone(),
                        source,
                    })?;
                Ok(ChallengeResponse::AuthenticatorValidate { duo })
            }
            Stage::AccessDenied(denied) => {
                warn!("Flow denied access");
                Err(FlowError::AccessDenied {
                    message: denied.error_message.clone(),
                })
            }
            Stage::Unsupported { component } => Err(FlowError::UnsupportedChallenge {
                component: component.clone(),
                reason: "component is not supported".to_string(),
            }),
        }
    }
}

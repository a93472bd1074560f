use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Component name of the identification stage
pub const COMPONENT_IDENTIFICATION: &str = "ak-stage-identification";
/// Component name of the password stage
pub const COMPONENT_PASSWORD: &str = "ak-stage-password";
/// Component name of the authenticator validation stage
pub const COMPONENT_AUTHENTICATOR_VALIDATE: &str = "ak-stage-authenticator-validate";
/// Component name of the access denied stage
pub const COMPONENT_ACCESS_DENIED: &str = "ak-stage-access-denied";

/// Kind of stage a challenge belongs to, keyed by its `component` string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// `ak-stage-identification`
    Identification,
    /// `ak-stage-password`
    Password,
    /// `ak-stage-authenticator-validate`
    AuthenticatorValidate,
    /// `ak-stage-access-denied`
    AccessDenied,
    /// Any other component the server may emit
    Unsupported(String),
}

impl StageKind {
    /// Classify a component string
    pub fn from_component(component: &str) -> Self {
        match component {
            COMPONENT_IDENTIFICATION => StageKind::Identification,
            COMPONENT_PASSWORD => StageKind::Password,
            COMPONENT_AUTHENTICATOR_VALIDATE => StageKind::AuthenticatorValidate,
            COMPONENT_ACCESS_DENIED => StageKind::AccessDenied,
            other => StageKind::Unsupported(other.to_string()),
        }
    }

    /// Component string as sent on the wire
    pub fn component(&self) -> &str {
        match self {
            StageKind::Identification => COMPONENT_IDENTIFICATION,
            StageKind::Password => COMPONENT_PASSWORD,
            StageKind::AuthenticatorValidate => COMPONENT_AUTHENTICATOR_VALIDATE,
            StageKind::AccessDenied => COMPONENT_ACCESS_DENIED,
            StageKind::Unsupported(component) => component,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.component())
    }
}

impl From<&str> for StageKind {
    fn from(component: &str) -> Self {
        StageKind::from_component(component)
    }
}

/// How the client is expected to present a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    /// Rendered by a native stage component
    Native,
    /// Raw HTML shell
    Shell,
    /// Flow is finished, follow `to`
    Redirect,
    /// Type not known to this client
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeType::Native => write!(f, "native"),
            ChallengeType::Shell => write!(f, "shell"),
            ChallengeType::Redirect => write!(f, "redirect"),
            ChallengeType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Field-level error reported by the server for a submitted response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorDetail {
    /// Human readable message
    pub string: String,
    /// Machine readable code (e.g. "invalid")
    #[serde(default)]
    pub code: String,
}

/// Class of a second-factor device offered during authenticator validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Static recovery tokens
    Static,
    /// Time-based one-time passwords
    Totp,
    /// WebAuthn security keys
    Webauthn,
    /// Duo push/hardware tokens
    Duo,
    /// SMS codes
    Sms,
    /// Device class not known to this client
    #[serde(other)]
    Unknown,
}

/// Candidate device offered by an authenticator validation challenge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceChallenge {
    /// Device class
    pub device_class: DeviceClass,
    /// Device identifier, numeric for Duo devices
    pub device_uid: String,
    /// Class-specific challenge data
    #[serde(default)]
    pub challenge: Value,
}

/// Payload of an identification challenge
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IdentificationChallenge {
    /// User fields the identifier is matched against
    #[serde(default)]
    pub user_fields: Option<Vec<String>>,
    /// Label of the primary action
    #[serde(default)]
    pub primary_action: String,
    /// Whether the password is requested on the same stage
    #[serde(default)]
    pub password_fields: bool,
}

/// Payload of a password challenge
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PasswordChallenge {
    /// User the password is asked for
    #[serde(default)]
    pub pending_user: Option<String>,
}

/// Payload of an authenticator validation challenge
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AuthenticatorValidationChallenge {
    /// Devices the user may validate with
    #[serde(default)]
    pub device_challenges: Vec<DeviceChallenge>,
}

impl AuthenticatorValidationChallenge {
    /// Find the device challenge of the given class. The last matching entry wins.
    pub fn device(&self, class: DeviceClass) -> Option<&DeviceChallenge> {
        self.device_challenges
            .iter()
            .rev()
            .find(|d| d.device_class == class)
    }

    /// Device classes present in this challenge
    pub fn device_classes(&self) -> Vec<DeviceClass> {
        self.device_challenges.iter().map(|d| d.device_class).collect()
    }
}

/// Payload of an access denied challenge
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AccessDeniedChallenge {
    /// Reason given by the server
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Stage-specific part of a challenge, tagged by component
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Identification stage
    Identification(IdentificationChallenge),
    /// Password stage
    Password(PasswordChallenge),
    /// Authenticator validation stage
    AuthenticatorValidate(AuthenticatorValidationChallenge),
    /// Access denied
    AccessDenied(AccessDeniedChallenge),
    /// Component this client does not decode
    Unsupported {
        /// Component string as sent by the server
        component: String,
    },
}

impl Stage {
    /// Kind of this stage
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Identification(_) => StageKind::Identification,
            Stage::Password(_) => StageKind::Password,
            Stage::AuthenticatorValidate(_) => StageKind::AuthenticatorValidate,
            Stage::AccessDenied(_) => StageKind::AccessDenied,
            Stage::Unsupported { component } => StageKind::Unsupported(component.clone()),
        }
    }
}

/// A challenge returned by the flow executor
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawChallenge")]
pub struct Challenge {
    /// Presentation type
    pub challenge_type: ChallengeType,
    /// Decoded stage payload
    pub stage: Stage,
    /// Field-level errors for the previous submission, ordered by field name
    pub response_errors: BTreeMap<String, Vec<ErrorDetail>>,
    /// Redirect target for `redirect` challenges
    pub redirect_to: Option<String>,
}

impl Challenge {
    /// Kind of the stage this challenge belongs to
    pub fn component(&self) -> StageKind {
        self.stage.kind()
    }

    /// Whether the flow finished with a redirect
    pub fn is_redirect(&self) -> bool {
        self.challenge_type == ChallengeType::Redirect
    }

    /// First field error, taking fields in lexicographic order and skipping fields
    /// without any message
    pub fn first_response_error(&self) -> Option<(&str, &ErrorDetail)> {
        self.response_errors
            .iter()
            .find_map(|(field, errors)| errors.first().map(|e| (field.as_str(), e)))
    }
}

/// Envelope shared by every challenge. Stage fields stay in `fields` until the
/// component is known.
#[derive(Deserialize)]
struct RawChallenge {
    #[serde(default)]
    component: String,
    #[serde(rename = "type")]
    challenge_type: ChallengeType,
    #[serde(default)]
    response_errors: Option<BTreeMap<String, Vec<ErrorDetail>>>,
    #[serde(default)]
    to: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl TryFrom<RawChallenge> for Challenge {
    type Error = serde_json::Error;

    fn try_from(raw: RawChallenge) -> Result<Self, Self::Error> {
        let fields = Value::Object(raw.fields);
        let stage = match StageKind::from_component(&raw.component) {
            StageKind::Identification => Stage::Identification(serde_json::from_value(fields)?),
            StageKind::Password => Stage::Password(serde_json::from_value(fields)?),
            StageKind::AuthenticatorValidate => {
                Stage::AuthenticatorValidate(serde_json::from_value(fields)?)
            }
            StageKind::AccessDenied => Stage::AccessDenied(serde_json::from_value(fields)?),
            StageKind::Unsupported(component) => Stage::Unsupported { component },
        };

        Ok(Challenge {
            challenge_type: raw.challenge_type,
            stage,
            response_errors: raw.response_errors.unwrap_or_default(),
            redirect_to: raw.to,
        })
    }
}

/// Response submitted for a challenge, tagged by component
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "component")]
pub enum ChallengeResponse {
    /// Answer to an identification challenge
    #[serde(rename = "ak-stage-identification")]
    Identification {
        /// Username or email
        uid_field: String,
    },
    /// Answer to a password challenge
    #[serde(rename = "ak-stage-password")]
    Password {
        /// The password
        password: String,
    },
    /// Answer to an authenticator validation challenge, selecting a Duo device
    #[serde(rename = "ak-stage-authenticator-validate")]
    AuthenticatorValidate {
        /// Numeric Duo device id
        duo: i32,
    },
}

impl ChallengeResponse {
    /// Kind of stage this response answers
    pub fn kind(&self) -> StageKind {
        match self {
            ChallengeResponse::Identification { .. } => StageKind::Identification,
            ChallengeResponse::Password { .. } => StageKind::Password,
            ChallengeResponse::AuthenticatorValidate { .. } => StageKind::AuthenticatorValidate,
        }
    }
}

impl fmt::Debug for ChallengeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeResponse::Identification { uid_field } => f
                .debug_struct("Identification")
                .field("uid_field", uid_field)
                .finish(),
            ChallengeResponse::Password { .. } => f
                .debug_struct("Password")
                .field("password", &"[REDACTED]")
                .finish(),
            ChallengeResponse::AuthenticatorValidate { duo } => f
                .debug_struct("AuthenticatorValidate")
                .field("duo", duo)
                .finish(),
        }
    }
}

/// Result of an application access check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AccessCheckResult {
    /// Whether the bound policies passed
    pub passing: bool,
    /// Messages produced by the policies
    #[serde(default)]
    pub messages: Vec<String>,
}

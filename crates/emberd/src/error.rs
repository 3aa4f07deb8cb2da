//! Error taxonomies.
//!
//! Three parallel families that never cross a component boundary
//! untranslated:
//!
//! - [`DeviceError`]: failures of the outbound device-agent call,
//! - [`DirectiveError`]: protocol-level failures rendered as Alexa error
//!   envelopes with an HTTP success status,
//! - [`LinkingError`]: failures of the browser-driven account-linking flow,
//!   rendered as a human-facing page.
//!
//! The directive handler converts device and resolver errors into
//! [`DirectiveError`]; the linking workflow converts identity-provider and
//! store errors into [`LinkingError`]. Nothing escapes as a bare transport
//! fault.

use crate::store::StoreError;

/// Failures of a single device-agent call.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device control address is not a valid URL: {0}")]
    BadAddress(String),

    #[error("failed to mint device credential: {0}")]
    Credential(String),

    #[error("device agent did not respond: {0}")]
    Unreachable(String),

    #[error("device agent sent an undecodable acknowledgement: {0}")]
    MalformedResponse(String),

    #[error("device state could not be persisted: {0}")]
    Store(#[from] StoreError),
}

impl DeviceError {
    /// Whether the caller may usefully re-invoke the dispatcher.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeviceError::Unreachable(_) | DeviceError::Credential(_))
    }
}

/// Failures rendered as Alexa `ErrorResponse` envelopes.
#[derive(Debug, thiserror::Error)]
pub enum DirectiveError {
    #[error("invalid directive: {0}")]
    InvalidDirective(String),

    #[error("no such endpoint: {0}")]
    NoSuchEndpoint(String),

    #[error("endpoint unreachable: {0}")]
    EndpointUnreachable(String),

    #[error("endpoint is not in operation: {0}")]
    NotInOperation(String),

    #[error("bearer token could not be resolved to an account: {0}")]
    InvalidCredential(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DirectiveError {
    /// The machine-readable `payload.type` of the error envelope.
    pub fn error_type(&self) -> &'static str {
        match self {
            DirectiveError::InvalidDirective(_) => "INVALID_DIRECTIVE",
            DirectiveError::NoSuchEndpoint(_) => "NO_SUCH_ENDPOINT",
            DirectiveError::EndpointUnreachable(_) => "ENDPOINT_UNREACHABLE",
            DirectiveError::NotInOperation(_) => "NOT_IN_OPERATION",
            DirectiveError::InvalidCredential(_) => "INVALID_AUTHORIZATION_CREDENTIAL",
            DirectiveError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<DeviceError> for DirectiveError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::BadAddress(_)
            | DeviceError::Unreachable(_)
            | DeviceError::MalformedResponse(_) => {
                DirectiveError::EndpointUnreachable(err.to_string())
            }
            DeviceError::Credential(_) | DeviceError::Store(_) => {
                DirectiveError::Internal(err.to_string())
            }
        }
    }
}

impl From<crate::resolver::ResolveError> for DirectiveError {
    fn from(err: crate::resolver::ResolveError) -> Self {
        use crate::resolver::ResolveError;
        match err {
            ResolveError::TokenInvalid(_) | ResolveError::NotFound(_) => {
                DirectiveError::InvalidCredential(err.to_string())
            }
            ResolveError::Store(e) => DirectiveError::Internal(e.to_string()),
        }
    }
}

impl From<StoreError> for DirectiveError {
    fn from(err: StoreError) -> Self {
        DirectiveError::Internal(err.to_string())
    }
}

/// Failures of the browser-driven linking flow.
#[derive(Debug, thiserror::Error)]
pub enum LinkingError {
    #[error("server is not configured for account linking: {0}")]
    Misconfigured(String),

    #[error("authorization code exchange failed: {0}")]
    CodeExchange(String),

    #[error("identity provider rejected the request: {code}")]
    Provider {
        code: String,
        description: Option<String>,
    },

    #[error("profile fetch failed: {0}")]
    ProfileFetch(String),

    #[error("could not create account: {0}")]
    AccountCreate(String),

    #[error("no devices to link")]
    NoDevices,

    #[error("storage failure during linking: {0}")]
    Store(#[from] StoreError),
}

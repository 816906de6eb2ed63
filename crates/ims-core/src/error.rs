//! Error types for ims-core
//!
//! Every failure surfaced by the registration engine, the session registries
//! and the re-INVITE machinery is an [`ImsError`]. Registration and session
//! failures carry a stable error code so listeners can react without parsing
//! messages.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::session::SessionCategory;

/// Result type used throughout ims-core
pub type ImsResult<T> = std::result::Result<T, ImsError>;

/// Error codes reported to the registration listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationErrorCode {
    /// No response, transport failure or unrecognized status code
    RegistrationFailed,
    /// Three consecutive 401 challenges within one attempt
    TooMany401,
    /// Three consecutive 4xx/5xx/6xx responses without Retry-After
    TooMany4xx5xx6xx,
    /// A response the procedure cannot act on (e.g. 423 without Min-Expires)
    UnexpectedResponse,
    /// The network asked us to come back later (Retry-After present)
    RetryAfter,
}

impl RegistrationErrorCode {
    /// Stable numeric code for this error
    pub fn code(&self) -> u32 {
        match self {
            RegistrationErrorCode::RegistrationFailed => 1,
            RegistrationErrorCode::TooMany401 => 2,
            RegistrationErrorCode::TooMany4xx5xx6xx => 3,
            RegistrationErrorCode::UnexpectedResponse => 4,
            RegistrationErrorCode::RetryAfter => 5,
        }
    }
}

impl fmt::Display for RegistrationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationErrorCode::RegistrationFailed => "REGISTRATION_FAILED",
            RegistrationErrorCode::TooMany401 => "TOO_MANY_401",
            RegistrationErrorCode::TooMany4xx5xx6xx => "TOO_MANY_4XX_5XX_6XX",
            RegistrationErrorCode::UnexpectedResponse => "UNEXPECTED_RESPONSE",
            RegistrationErrorCode::RetryAfter => "RETRY_AFTER",
        };
        write!(f, "{}({})", name, self.code())
    }
}

/// Error codes reported to a session when something goes wrong on its dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionErrorCode {
    UnexpectedException,
    SessionInitiationFailed,
    SessionInitiationDeclined,
    SessionInitiationTimeout,
    /// The far end never acknowledged our 200 OK
    NoAck,
    ProxyAuthenticationFailed,
    MediaRenegotiationFailed,
}

impl SessionErrorCode {
    /// Stable numeric code for this error
    pub fn code(&self) -> u32 {
        match self {
            SessionErrorCode::UnexpectedException => 100,
            SessionErrorCode::SessionInitiationFailed => 101,
            SessionErrorCode::SessionInitiationDeclined => 102,
            SessionErrorCode::SessionInitiationTimeout => 103,
            SessionErrorCode::NoAck => 104,
            SessionErrorCode::ProxyAuthenticationFailed => 105,
            SessionErrorCode::MediaRenegotiationFailed => 106,
        }
    }
}

impl fmt::Display for SessionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Main error type for ims-core
#[derive(Debug, Clone, Error)]
pub enum ImsError {
    #[error("Registration error {code}: {message}")]
    Registration {
        code: RegistrationErrorCode,
        message: String,
    },

    #[error("Session error {code}: {message}")]
    Session {
        code: SessionErrorCode,
        message: String,
    },

    #[error("Session limit reached for {categories:?} (max {max})")]
    CapacityExceeded {
        categories: Vec<SessionCategory>,
        max: usize,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists for key {0}")]
    SessionAlreadyExists(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No response received within {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ImsError {
    /// Create a registration error
    pub fn registration(code: RegistrationErrorCode, message: impl Into<String>) -> Self {
        ImsError::Registration {
            code,
            message: message.into(),
        }
    }

    /// Create a session error
    pub fn session(code: SessionErrorCode, message: impl Into<String>) -> Self {
        ImsError::Session {
            code,
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        ImsError::Protocol(message.into())
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        ImsError::Transport(message.into())
    }

    /// Registration error code, if this is a registration failure
    pub fn registration_code(&self) -> Option<RegistrationErrorCode> {
        match self {
            ImsError::Registration { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Session error code, if this is a session failure
    pub fn session_code(&self) -> Option<SessionErrorCode> {
        match self {
            ImsError::Session { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether this error is a session capacity rejection
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, ImsError::CapacityExceeded { .. })
    }
}

impl From<rvoip_sip_core::Error> for ImsError {
    fn from(err: rvoip_sip_core::Error) -> Self {
        ImsError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_codes_are_stable() {
        assert_eq!(RegistrationErrorCode::RegistrationFailed.code(), 1);
        assert_eq!(RegistrationErrorCode::TooMany401.code(), 2);
        assert_eq!(RegistrationErrorCode::TooMany4xx5xx6xx.code(), 3);
        assert_eq!(
            RegistrationErrorCode::TooMany401.to_string(),
            "TOO_MANY_401(2)"
        );
    }

    #[test]
    fn test_error_accessors() {
        let err = ImsError::registration(RegistrationErrorCode::TooMany401, "too many 401");
        assert_eq!(err.registration_code(), Some(RegistrationErrorCode::TooMany401));
        assert_eq!(err.session_code(), None);
        assert!(err.to_string().contains("too many 401"));

        let err = ImsError::CapacityExceeded {
            categories: vec![SessionCategory::OneToOneChat],
            max: 2,
        };
        assert!(err.is_capacity_exceeded());
    }

    #[test]
    fn test_sip_parse_errors_are_protocol_errors() {
        let err: ImsError = "not a uri".parse::<rvoip_sip_core::Uri>().unwrap_err().into();
        assert!(matches!(err, ImsError::Protocol(_)));
    }
}

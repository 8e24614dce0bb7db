use serde::Serialize;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("missing permission: {0}")]
    InsufficientPermission(&'static str),
    #[error("Age verification required")]
    RestrictedContentGate,
    #[error("{0}")]
    Unauthenticated(String),
    #[error("Too many requests")]
    RateLimited,
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("connection {0} is already registered")]
    DuplicateRegistration(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl RelayError {
    /// Machine-readable code sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::NotFound(_) => "NotFound",
            RelayError::Forbidden(_) => "Forbidden",
            RelayError::InsufficientPermission(_) => "InsufficientPermission",
            RelayError::RestrictedContentGate => "RestrictedContentGate",
            RelayError::Unauthenticated(_) => "Unauthenticated",
            RelayError::RateLimited => "RateLimited",
            RelayError::UpstreamUnavailable(_) => "UpstreamUnavailable",
            RelayError::DuplicateRegistration(_) => "DuplicateRegistration",
            RelayError::InvalidRequest(_) => "InvalidRequest",
            RelayError::Storage(_) => "Internal",
        }
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            RelayError::Forbidden(_)
                | RelayError::InsufficientPermission(_)
                | RelayError::RestrictedContentGate
        )
    }

    /// Payload carried by a failed acknowledgment.
    pub fn to_ack(&self) -> AckError {
        let message = match self {
            // storage details stay in the logs
            RelayError::Storage(_) => "Internal error".to_string(),
            other => other.to_string(),
        };
        AckError {
            error: message,
            code: Some(self.code()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AckError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

pub type RelayResult<T> = Result<T, RelayError>;

use tandem_core::PolicyError;
use tandem_store::StoreError;
use thiserror::Error;

/// Message returned for every failure the caller cannot act on.
pub const INTERNAL_MESSAGE: &str = "Internal server error.";

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or missing request fields.
    #[error("{0}")]
    Validation(String),
    /// Unknown unit, or no policy parameters to decide with.
    #[error("{0}")]
    NotFound(String),
    /// Write-once key already taken. Retrying will not help.
    #[error("{0}")]
    Conflict(String),
    /// Context or outcome rejected by the policy.
    #[error("{0}")]
    Policy(PolicyError),
    /// Anything else. The detail is logged, never returned.
    #[error("internal failure: {0}")]
    Internal(String),
}

impl ServiceError {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            ServiceError::Validation(_) | ServiceError::Conflict(_) | ServiceError::Policy(_) => {
                400
            }
            ServiceError::NotFound(_) => 404,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Text that may be shown to the caller.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Internal(_) => INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, ServiceError::Internal(_))
    }
}

impl From<PolicyError> for ServiceError {
    fn from(err: PolicyError) -> Self {
        if err.is_client_error() {
            ServiceError::Policy(err)
        } else {
            ServiceError::Internal(err.to_string())
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

use tandem_core::PolicyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BanditError {
    #[error("Parameter '{0}' is missing")]
    MissingParameter(&'static str),
    #[error("Parameter '{name}' must be {expected}")]
    WrongType {
        name: &'static str,
        expected: &'static str,
    },
    #[error("Parameter '{name}' is out of range: {value}")]
    OutOfRange { name: &'static str, value: f64 },
    #[error("Snapshot deserialization failed: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl From<BanditError> for PolicyError {
    fn from(err: BanditError) -> Self {
        PolicyError::InvalidParameters(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BanditError>;

use thiserror::Error;

use crate::kind::JobKind;
use crate::schema::SchemaError;

/// Why a job attempt did not produce a usable result.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("invalid job input: {0}")]
    InvalidInput(String),

    #[error("job type {0} has no prompt")]
    Unsupported(JobKind),

    #[error("model output rejected: {0}")]
    InvalidOutput(#[from] SchemaError),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AiError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Bad input and unsupported kinds fail the same way every time; transport
    /// errors and malformed model output do not.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, AiError::InvalidInput(_) | AiError::Unsupported(_))
    }
}

//! Error types for pod definition parsing and validation.

use thiserror::Error;

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while decoding or validating pod definitions.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid pod JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid pod {pod}: {reason}")]
    Invalid { pod: String, reason: String },

    #[error("invalid lock key: {0}")]
    LockKey(String),
}

//! Error types for the boosted-tree capability

use thiserror::Error;

/// Errors returned by the booster.
#[derive(Debug, Error)]
pub enum GbdtError {
    /// Training input is malformed (shape mismatch, empty, bad labels)
    #[error("invalid training data: {0}")]
    InvalidData(String),

    /// Hyperparameters out of their valid range
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Feature matrix does not match the model it is scored against
    #[error("feature mismatch: model expects {expected} features, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    /// Model structure failed validation
    #[error("model validation failed: {0}")]
    ValidationFailed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for booster operations
pub type Result<T> = std::result::Result<T, GbdtError>;

//! Error types for rack-core.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors produced by parsing and validating core data.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("invalid option {name}: {reason}")]
    Option { name: String, reason: String },

    #[error("invalid duration: {0}")]
    Duration(String),

    #[error("invalid timestamp: {0}")]
    Timestamp(String),
}

impl CoreError {
    pub fn option(name: &str, reason: impl Into<String>) -> Self {
        CoreError::Option {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

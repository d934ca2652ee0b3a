//! Error types for provider operations.
//!
//! Provider error messages travel verbatim to API clients; they are part
//! of the wire contract and must not be wrapped with extra context.

use thiserror::Error;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors returned by provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A named entity does not exist. Rendered as 404.
    #[error("{0}")]
    NotFound(String),

    /// The operation exists only as an operator side channel.
    #[error("not available via api")]
    Unavailable,

    /// Any other backend failure. Rendered as 500 with the message
    /// passed through untouched.
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ProviderError::NotFound(what.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        ProviderError::Other(msg.into())
    }
}

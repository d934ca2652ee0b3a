//! Error types for the build pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type BuildResult<T> = Result<T, BuildError>;

/// Errors that abort a build. The first error wins: the pipeline
/// performs no retries and reports the message verbatim in the log.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid auth: {0}")]
    Auth(String),

    #[error("unsupported source url: {0}")]
    Source(String),

    #[error("{0}")]
    Manifest(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("{0}")]
    Provider(#[from] rack_provider::ProviderError),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

//! Error types for the router.

use thiserror::Error;

/// Result type alias for router operations.
pub type RouterResult<T> = Result<T, RouterError>;

/// Errors raised by router subsystems.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The configured CIDR has no free rack or host addresses left.
    #[error("ip exhaustion")]
    IpExhaustion,

    #[error("invalid cidr: {0}")]
    Cidr(String),

    #[error("no such rack: {0}")]
    UnknownRack(String),

    #[error("no such host: {0}")]
    UnknownHost(String),

    #[error("no such endpoint: {0}")]
    UnknownEndpoint(String),

    /// An endpoint with an empty target set cannot serve a connection.
    #[error("no targets for {0}")]
    NoTargets(String),

    #[error("invalid target: {0}")]
    Target(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("dns error: {0}")]
    Dns(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

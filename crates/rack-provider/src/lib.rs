//! rack-provider — the capability set every backend implements.
//!
//! The API server, the build pipeline, and the router all talk to a
//! backend exclusively through the [`Provider`] trait. Any backend that
//! satisfies it is pluggable; this crate ships the in-memory
//! [`MockProvider`] used throughout the test suites.

pub mod error;
pub mod mock;
pub mod provider;

pub use error::{ProviderError, ProviderResult};
pub use mock::MockProvider;
pub use provider::{Provider, Reader, Stream};

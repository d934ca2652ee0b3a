//! rack-api — the HTTP/WebSocket surface over the provider.
//!
//! Every request authenticates (rack password or JWT), authorizes by
//! method class (GET reads, everything else writes), decodes options
//! from form/query/header, and dispatches to the provider. Interactive
//! operations upgrade to a WebSocket and terminate with a literal exit
//! trailer; provider error messages pass through verbatim.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod params;
pub mod server;
pub mod stream;
pub mod validate;

pub use error::{ApiError, ApiResult};
pub use server::{build_router, ApiState, Server};
pub use stream::EXIT_SENTINEL;

//! API error rendering.
//!
//! Provider messages travel to the client verbatim so client-side
//! pattern matching keeps working; the error kind only selects the
//! status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rack_provider::ProviderError;
use thiserror::Error;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by the API layer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed options or body. 400.
    #[error("{0}")]
    BadRequest(String),

    /// Bad password or token. 401.
    #[error("{0}")]
    Unauthenticated(String),

    /// Role insufficient for the method. 401.
    #[error("you are unauthorized to access this")]
    Unauthorized,

    /// A state precondition failed. 403 with a verbatim phrase.
    #[error("{0}")]
    Validation(String),

    /// Unknown entity or out-of-band operation. 404.
    #[error("{0}")]
    NotFound(String),

    /// Backend failure, message passed through untouched. 500.
    #[error("{0}")]
    Provider(String),
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => ApiError::NotFound(msg),
            ProviderError::Unavailable => ApiError::NotFound(err.to_string()),
            ProviderError::Other(msg) => ApiError::Provider(msg),
        }
    }
}

impl From<rack_core::CoreError> for ApiError {
    fn from(err: rack_core::CoreError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) | ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Provider(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

//! Route handlers, grouped by noun.
//!
//! Each handler collects request params, decodes the operation's
//! options, invokes the provider, and renders the result. Collections
//! with a natural ordering are sorted before rendering; empty-body
//! operations render `{"success":true}`.

pub mod apps;
pub mod builds;
pub mod certificates;
pub mod instances;
pub mod objects;
pub mod processes;
pub mod registries;
pub mod releases;
pub mod resources;
pub mod system;

use axum::Json;
use tokio::io::AsyncReadExt;

use crate::error::{ApiError, ApiResult};

/// Render for operations with no result body.
pub(crate) fn ok() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true }))
}

/// Drain a provider reader into memory for a bounded response body.
pub(crate) async fn drain(mut reader: rack_provider::Reader) -> ApiResult<Vec<u8>> {
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .await
        .map_err(|e| ApiError::Provider(e.to_string()))?;
    Ok(data)
}

/// Require a form/query parameter.
pub(crate) fn require(params: &rack_core::options::Params, name: &str) -> ApiResult<String> {
    params
        .get(name)
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest(format!("{name} required")))
}

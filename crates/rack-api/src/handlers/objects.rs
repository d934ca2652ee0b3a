//! Object handlers.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rack_core::options::{ObjectListOptions, ObjectStoreOptions};
use rack_core::types::Object;

use crate::error::ApiResult;
use crate::handlers::{drain, ok};
use crate::params;
use crate::server::ApiState;

pub async fn list(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<String>>> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let opts = ObjectListOptions::decode(&params)?;
    let mut keys = state
        .provider
        .object_list(&app, opts.prefix.as_deref().unwrap_or(""))
        .await?;
    keys.sort();
    Ok(Json(keys))
}

pub async fn exists(
    State(state): State<ApiState>,
    Path((app, key)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    match state.provider.object_exists(&app, &key).await? {
        true => Ok(StatusCode::OK),
        false => Ok(StatusCode::NOT_FOUND),
    }
}

pub async fn fetch(
    State(state): State<ApiState>,
    Path((app, key)): Path<(String, String)>,
) -> ApiResult<Response> {
    let data = drain(state.provider.object_fetch(&app, &key).await?).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

pub async fn store(
    State(state): State<ApiState>,
    Path((app, key)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Object>> {
    // The body is the object itself; options come from the query.
    let params = params::collect(query.as_deref(), &headers, b"");
    let opts = ObjectStoreOptions::decode(&params)?;
    let source: rack_provider::Reader = Box::new(std::io::Cursor::new(body.to_vec()));
    Ok(Json(state.provider.object_store(&app, &key, source, opts).await?))
}

pub async fn delete(
    State(state): State<ApiState>,
    Path((app, key)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    state.provider.object_delete(&app, &key).await?;
    Ok(ok())
}

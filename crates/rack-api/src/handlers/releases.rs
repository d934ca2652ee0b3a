//! Release handlers.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::HeaderMap;
use axum::Json;
use rack_core::options::{ReleaseCreateOptions, ReleaseListOptions, ReleasePromoteOptions};
use rack_core::types::Release;

use crate::error::ApiResult;
use crate::handlers::ok;
use crate::params;
use crate::server::ApiState;
use crate::validate::Validators;

pub async fn list(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Release>>> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let opts = ReleaseListOptions::decode(&params)?;
    let mut releases = state.provider.release_list(&app, opts).await?;
    releases.sort_by(|a, b| b.created.cmp(&a.created));
    Ok(Json(releases))
}

pub async fn create(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Release>> {
    let params = params::collect(query.as_deref(), &headers, &body);
    let opts = ReleaseCreateOptions::decode(&params)?;
    Ok(Json(state.provider.release_create(&app, opts).await?))
}

pub async fn get(
    State(state): State<ApiState>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Json<Release>> {
    Ok(Json(state.provider.release_get(&app, &id).await?))
}

pub async fn promote(
    State(state): State<ApiState>,
    Path((app, id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let params = params::collect(query.as_deref(), &headers, &body);
    let opts = ReleasePromoteOptions::decode(&params)?;

    let current = state.provider.app_get(&app).await?;
    Validators::check(state.validators.release_promote, &current)?;

    state.provider.release_promote(&app, &id, opts).await?;
    Ok(ok())
}

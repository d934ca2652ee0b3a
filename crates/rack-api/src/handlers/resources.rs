//! Resource handlers. `OPTIONS /resources` serves the type catalog.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::HeaderMap;
use axum::Json;
use rack_core::options::{ResourceCreateOptions, ResourceUpdateOptions};
use rack_core::types::{Resource, ResourceType};

use crate::error::ApiResult;
use crate::handlers::{ok, require};
use crate::params;
use crate::server::ApiState;

pub async fn list(State(state): State<ApiState>) -> ApiResult<Json<Vec<Resource>>> {
    let mut resources = state.provider.resource_list().await?;
    resources.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(resources))
}

pub async fn types(State(state): State<ApiState>) -> ApiResult<Json<Vec<ResourceType>>> {
    let mut types = state.provider.resource_types().await?;
    types.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(types))
}

pub async fn create(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Resource>> {
    let params = params::collect(query.as_deref(), &headers, &body);
    let kind = require(&params, "type")?;
    let opts = ResourceCreateOptions::decode(&params)?;
    Ok(Json(state.provider.resource_create(&kind, opts).await?))
}

pub async fn get(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Resource>> {
    Ok(Json(state.provider.resource_get(&name).await?))
}

pub async fn update(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Resource>> {
    let params = params::collect(query.as_deref(), &headers, &body);
    let opts = ResourceUpdateOptions::decode(&params)?;
    Ok(Json(state.provider.resource_update(&name, opts).await?))
}

pub async fn delete(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.provider.resource_delete(&name).await?;
    Ok(ok())
}

//! Registry handlers.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::HeaderMap;
use axum::Json;
use rack_core::types::Registry;

use crate::error::ApiResult;
use crate::handlers::{ok, require};
use crate::params;
use crate::server::ApiState;

pub async fn list(State(state): State<ApiState>) -> ApiResult<Json<Vec<Registry>>> {
    let mut registries = state.provider.registry_list().await?;
    registries.sort_by(|a, b| a.server.cmp(&b.server));
    Ok(Json(registries))
}

pub async fn add(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Registry>> {
    let params = params::collect(query.as_deref(), &headers, &body);
    let server = require(&params, "server")?;
    let username = require(&params, "username")?;
    let password = require(&params, "password")?;
    Ok(Json(
        state.provider.registry_add(&server, &username, &password).await?,
    ))
}

pub async fn remove(
    State(state): State<ApiState>,
    Path(server): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.provider.registry_remove(&server).await?;
    Ok(ok())
}

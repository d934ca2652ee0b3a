//! App handlers.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use rack_core::options::{AppCreateOptions, AppUpdateOptions, LogsOptions, MetricsOptions};
use rack_core::types::{App, Metric};

use crate::error::ApiResult;
use crate::handlers::{ok, require};
use crate::params;
use crate::server::ApiState;
use crate::stream;
use crate::validate::Validators;

pub async fn list(State(state): State<ApiState>) -> ApiResult<Json<Vec<App>>> {
    let mut apps = state.provider.app_list().await?;
    apps.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(apps))
}

pub async fn create(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<App>> {
    let params = params::collect(query.as_deref(), &headers, &body);
    let name = require(&params, "name")?;
    let opts = AppCreateOptions::decode(&params)?;
    Ok(Json(state.provider.app_create(&name, opts).await?))
}

pub async fn get(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<App>> {
    Ok(Json(state.provider.app_get(&name).await?))
}

pub async fn update(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let params = params::collect(query.as_deref(), &headers, &body);
    let opts = AppUpdateOptions::decode(&params)?;
    state.provider.app_update(&name, opts).await?;
    Ok(ok())
}

pub async fn delete(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.provider.app_delete(&name).await?;
    Ok(ok())
}

pub async fn cancel(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let app = state.provider.app_get(&name).await?;
    Validators::check(state.validators.app_cancel, &app)?;
    state.provider.app_cancel(&name).await?;
    Ok(ok())
}

pub async fn metrics(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Metric>>> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let opts = MetricsOptions::decode(&params)?;
    let mut metrics: Vec<Metric> = state
        .provider
        .app_metrics(&name, opts)
        .await?
        .into_iter()
        .map(Metric::sorted)
        .collect();
    metrics.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(metrics))
}

pub async fn logs(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path(name): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let opts = LogsOptions::decode(&params)?;
    Ok(ws.on_upgrade(move |socket| async move {
        match state.provider.app_logs(&name, opts).await {
            Ok(source) => stream::reader(socket, source).await,
            Err(err) => stream::send_error(socket, &err).await,
        }
    }))
}

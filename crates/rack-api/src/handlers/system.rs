//! System handlers, the auth handshake, and the opaque proxy.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use rack_core::options::{
    LogsOptions, MetricsOptions, SystemProcessesOptions, SystemUpdateOptions,
};
use rack_core::types::{Capacity, Metric, Process, Release, System};

use crate::error::{ApiError, ApiResult};
use crate::handlers::ok;
use crate::params;
use crate::server::ApiState;
use crate::stream;

/// Credential handshake. Authentication already ran in the middleware;
/// reaching the handler means the credentials are good.
pub async fn auth() -> Json<serde_json::Value> {
    ok()
}

pub async fn get(State(state): State<ApiState>) -> ApiResult<Json<System>> {
    Ok(Json(state.provider.system_get().await?))
}

pub async fn update(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let params = params::collect(query.as_deref(), &headers, &body);
    let opts = SystemUpdateOptions::decode(&params)?;
    state.provider.system_update(opts).await?;
    Ok(ok())
}

pub async fn capacity(State(state): State<ApiState>) -> ApiResult<Json<Capacity>> {
    Ok(Json(state.provider.system_capacity().await?))
}

pub async fn metrics(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Metric>>> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let opts = MetricsOptions::decode(&params)?;
    let mut metrics: Vec<Metric> = state
        .provider
        .system_metrics(opts)
        .await?
        .into_iter()
        .map(Metric::sorted)
        .collect();
    metrics.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(metrics))
}

pub async fn processes(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Process>>> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let opts = SystemProcessesOptions::decode(&params)?;
    let mut processes = state.provider.system_processes(opts).await?;
    processes.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    Ok(Json(processes))
}

pub async fn releases(State(state): State<ApiState>) -> ApiResult<Json<Vec<Release>>> {
    let mut releases = state.provider.system_releases().await?;
    releases.sort_by(|a, b| b.created.cmp(&a.created));
    Ok(Json(releases))
}

pub async fn logs(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let opts = LogsOptions::decode(&params)?;
    Ok(ws.on_upgrade(move |socket| async move {
        match state.provider.system_logs(opts).await {
            Ok(source) => stream::reader(socket, source).await,
            Err(err) => stream::send_error(socket, &err).await,
        }
    }))
}

/// Opaque L4 proxy to `host:port`, trailer-terminated like exec.
pub async fn proxy(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path((host, port)): Path<(String, String)>,
) -> ApiResult<Response> {
    let port: u16 = port
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid port: {port}")))?;
    Ok(ws.on_upgrade(move |socket| async move {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let provider = state.provider.clone();
        let op = async move { provider.proxy(&host, port, Box::new(server)).await };
        stream::interactive(socket, client, op).await;
    }))
}

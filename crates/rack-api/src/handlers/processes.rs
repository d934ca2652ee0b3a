//! Process handlers, including the interactive exec session.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rack_core::options::{
    LogsOptions, ProcessExecOptions, ProcessListOptions, ProcessRunOptions,
};
use rack_core::types::Process;

use crate::error::ApiResult;
use crate::handlers::{drain, ok, require};
use crate::params;
use crate::server::ApiState;
use crate::stream;

pub async fn list(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Process>>> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let opts = ProcessListOptions::decode(&params)?;
    let mut processes = state.provider.process_list(&app, opts).await?;
    processes.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    Ok(Json(processes))
}

pub async fn get(
    State(state): State<ApiState>,
    Path((app, pid)): Path<(String, String)>,
) -> ApiResult<Json<Process>> {
    Ok(Json(state.provider.process_get(&app, &pid).await?))
}

pub async fn stop(
    State(state): State<ApiState>,
    Path((app, pid)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    state.provider.process_stop(&app, &pid).await?;
    Ok(ok())
}

pub async fn run(
    State(state): State<ApiState>,
    Path((app, service)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Process>> {
    let params = params::collect(query.as_deref(), &headers, &body);
    let opts = ProcessRunOptions::decode(&params)?;
    Ok(Json(state.provider.process_run(&app, &service, opts).await?))
}

/// Interactive exec: bidirectional bytes, exit status in the trailer.
pub async fn exec(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path((app, pid)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let command = require(&params, "command")?;
    let opts = ProcessExecOptions::decode(&params)?;
    Ok(ws.on_upgrade(move |socket| async move {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let provider = state.provider.clone();
        let op = async move {
            provider
                .process_exec(&app, &pid, &command, Box::new(server), opts)
                .await
        };
        stream::interactive(socket, client, op).await;
    }))
}

pub async fn logs(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path((app, pid)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let opts = LogsOptions::decode(&params)?;
    Ok(ws.on_upgrade(move |socket| async move {
        match state.provider.process_logs(&app, &pid, opts).await {
            Ok(source) => stream::reader(socket, source).await,
            Err(err) => stream::send_error(socket, &err).await,
        }
    }))
}

pub async fn files_download(
    State(state): State<ApiState>,
    Path((app, pid)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let file = require(&params, "file")?;
    let data = drain(state.provider.files_download(&app, &pid, &file).await?).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

pub async fn files_upload(
    State(state): State<ApiState>,
    Path((app, pid)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let source: rack_provider::Reader = Box::new(std::io::Cursor::new(body.to_vec()));
    state.provider.files_upload(&app, &pid, source).await?;
    Ok(ok())
}

pub async fn files_delete(
    State(state): State<ApiState>,
    Path((app, pid)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let files = require(&params, "files")?
        .split(',')
        .map(str::to_string)
        .collect();
    state.provider.files_delete(&app, &pid, files).await?;
    Ok(ok())
}

//! Build handlers.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rack_core::options::{BuildCreateOptions, BuildListOptions, BuildUpdateOptions, LogsOptions};
use rack_core::types::Build;

use crate::error::ApiResult;
use crate::handlers::{drain, require};
use crate::params;
use crate::server::ApiState;
use crate::stream;

pub async fn list(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Build>>> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let opts = BuildListOptions::decode(&params)?;
    let mut builds = state.provider.build_list(&app, opts).await?;
    builds.sort_by(|a, b| b.started.cmp(&a.started));
    Ok(Json(builds))
}

pub async fn create(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Build>> {
    let params = params::collect(query.as_deref(), &headers, &body);
    let url = require(&params, "url")?;
    let opts = BuildCreateOptions::decode(&params)?;
    Ok(Json(state.provider.build_create(&app, &url, opts).await?))
}

/// `GET /apps/{app}/builds/{id}`; an id ending in `.tgz` exports the
/// build artifact instead of rendering the record.
pub async fn get(
    State(state): State<ApiState>,
    Path((app, id)): Path<(String, String)>,
) -> ApiResult<Response> {
    if let Some(id) = id.strip_suffix(".tgz") {
        let data = drain(state.provider.build_export(&app, id).await?).await?;
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/gzip")],
            data,
        )
            .into_response());
    }
    let build = state.provider.build_get(&app, &id).await?;
    Ok(Json(build).into_response())
}

pub async fn update(
    State(state): State<ApiState>,
    Path((app, id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Build>> {
    let params = params::collect(query.as_deref(), &headers, &body);
    let opts = BuildUpdateOptions::decode(&params)?;
    Ok(Json(state.provider.build_update(&app, &id, opts).await?))
}

pub async fn import(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Build>> {
    let source: rack_provider::Reader = Box::new(std::io::Cursor::new(body.to_vec()));
    Ok(Json(state.provider.build_import(&app, source).await?))
}

pub async fn logs(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path((app, id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let opts = LogsOptions::decode(&params)?;
    Ok(ws.on_upgrade(move |socket| async move {
        match state.provider.build_logs(&app, &id, opts).await {
            Ok(source) => stream::reader(socket, source).await,
            Err(err) => stream::send_error(socket, &err).await,
        }
    }))
}

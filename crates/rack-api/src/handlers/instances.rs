//! Instance handlers, including the interactive host shell.

use axum::extract::{Path, RawQuery, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use rack_core::options::InstanceShellOptions;
use rack_core::types::Instance;

use crate::error::ApiResult;
use crate::handlers::ok;
use crate::params;
use crate::server::ApiState;
use crate::stream;

pub async fn list(State(state): State<ApiState>) -> ApiResult<Json<Vec<Instance>>> {
    let mut instances = state.provider.instance_list().await?;
    instances.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Json(instances))
}

pub async fn keyroll(State(state): State<ApiState>) -> ApiResult<Json<serde_json::Value>> {
    state.provider.instance_keyroll().await?;
    Ok(ok())
}

pub async fn terminate(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.provider.instance_terminate(&id).await?;
    Ok(ok())
}

pub async fn shell(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let params = params::collect(query.as_deref(), &headers, b"");
    let opts = InstanceShellOptions::decode(&params)?;
    Ok(ws.on_upgrade(move |socket| async move {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let provider = state.provider.clone();
        let op = async move { provider.instance_shell(&id, Box::new(server), opts).await };
        stream::interactive(socket, client, op).await;
    }))
}

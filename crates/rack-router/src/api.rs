//! Router control API.
//!
//! A small HTTPS API on the base address exposing rack, host,
//! endpoint, and target CRUD plus `/terminate`. Structural changes are
//! also forwarded to the assembly loop so it can bind listeners and
//! interface aliases.

use std::net::Ipv4Addr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::error::RouterError;
use crate::model::{Endpoint, Host, Protocol, Rack, Table};

/// Structural changes the assembly loop reacts to.
#[derive(Debug)]
pub enum Op {
    HostAdded {
        ip: Ipv4Addr,
    },
    HostRemoved {
        ip: Ipv4Addr,
    },
    EndpointAdded {
        rack: String,
        hostname: String,
        ip: Ipv4Addr,
        protocol: Protocol,
        port: u16,
    },
}

#[derive(Clone)]
pub struct ControlState {
    pub table: Table,
    pub ops: mpsc::UnboundedSender<Op>,
    pub shutdown: watch::Sender<bool>,
}

struct ControlError(RouterError);

impl From<RouterError> for ControlError {
    fn from(err: RouterError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            RouterError::UnknownRack(_)
            | RouterError::UnknownHost(_)
            | RouterError::UnknownEndpoint(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

type ControlResult<T> = Result<T, ControlError>;

#[derive(Deserialize)]
struct RackBody {
    name: String,
}

#[derive(Deserialize)]
struct HostBody {
    hostname: String,
}

#[derive(Deserialize)]
struct EndpointBody {
    protocol: Protocol,
    port: u16,
}

#[derive(Deserialize)]
struct TargetBody {
    target: String,
}

/// Assemble the control router.
pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/racks", get(rack_list).post(rack_create))
        .route("/racks/{rack}", get(rack_get).delete(rack_delete))
        .route("/racks/{rack}/hosts", get(host_list).post(host_create))
        .route("/racks/{rack}/hosts/{host}", get(host_get).delete(host_delete))
        .route(
            "/racks/{rack}/hosts/{host}/endpoints",
            get(endpoint_list).post(endpoint_create),
        )
        .route(
            "/racks/{rack}/hosts/{host}/endpoints/{port}/targets",
            get(target_list).post(target_add).delete(target_remove),
        )
        .route("/terminate", post(terminate))
        .with_state(state)
}

async fn rack_list(State(state): State<ControlState>) -> Json<Vec<Rack>> {
    Json(state.table.rack_list())
}

async fn rack_create(
    State(state): State<ControlState>,
    Json(body): Json<RackBody>,
) -> ControlResult<Json<Rack>> {
    Ok(Json(state.table.rack_create(&body.name)?))
}

async fn rack_get(
    State(state): State<ControlState>,
    Path(rack): Path<String>,
) -> ControlResult<Json<Rack>> {
    Ok(Json(state.table.rack_get(&rack)?))
}

async fn rack_delete(
    State(state): State<ControlState>,
    Path(rack): Path<String>,
) -> ControlResult<Json<Rack>> {
    let rack = state.table.rack_delete(&rack)?;
    for host in &rack.hosts {
        let _ = state.ops.send(Op::HostRemoved { ip: host.ip });
    }
    Ok(Json(rack))
}

async fn host_list(
    State(state): State<ControlState>,
    Path(rack): Path<String>,
) -> ControlResult<Json<Vec<Host>>> {
    Ok(Json(state.table.rack_get(&rack)?.hosts))
}

async fn host_create(
    State(state): State<ControlState>,
    Path(rack): Path<String>,
    Json(body): Json<HostBody>,
) -> ControlResult<Json<Host>> {
    let host = state.table.host_create(&rack, &body.hostname)?;
    let _ = state.ops.send(Op::HostAdded { ip: host.ip });
    Ok(Json(host))
}

async fn host_get(
    State(state): State<ControlState>,
    Path((rack, host)): Path<(String, String)>,
) -> ControlResult<Json<Host>> {
    Ok(Json(state.table.host_get(&rack, &host)?))
}

async fn host_delete(
    State(state): State<ControlState>,
    Path((rack, host)): Path<(String, String)>,
) -> ControlResult<Json<Host>> {
    let host = state.table.host_delete(&rack, &host)?;
    let _ = state.ops.send(Op::HostRemoved { ip: host.ip });
    Ok(Json(host))
}

async fn endpoint_list(
    State(state): State<ControlState>,
    Path((rack, host)): Path<(String, String)>,
) -> ControlResult<Json<Vec<Endpoint>>> {
    Ok(Json(state.table.host_get(&rack, &host)?.endpoints))
}

async fn endpoint_create(
    State(state): State<ControlState>,
    Path((rack, host)): Path<(String, String)>,
    Json(body): Json<EndpointBody>,
) -> ControlResult<Json<Endpoint>> {
    let record = state.table.host_get(&rack, &host)?;
    let endpoint = state
        .table
        .endpoint_create(&rack, &host, body.protocol, body.port)?;
    let _ = state.ops.send(Op::EndpointAdded {
        rack: rack.clone(),
        hostname: host,
        ip: record.ip,
        protocol: endpoint.protocol,
        port: endpoint.port,
    });
    Ok(Json(endpoint))
}

async fn target_list(
    State(state): State<ControlState>,
    Path((rack, host, port)): Path<(String, String, u16)>,
) -> ControlResult<Json<Vec<String>>> {
    Ok(Json(state.table.endpoint_get(&rack, &host, port)?.targets))
}

async fn target_add(
    State(state): State<ControlState>,
    Path((rack, host, port)): Path<(String, String, u16)>,
    Json(body): Json<TargetBody>,
) -> ControlResult<Json<serde_json::Value>> {
    state.table.target_add(&rack, &host, port, &body.target)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn target_remove(
    State(state): State<ControlState>,
    Path((rack, host, port)): Path<(String, String, u16)>,
    Json(body): Json<TargetBody>,
) -> ControlResult<Json<serde_json::Value>> {
    state.table.target_remove(&rack, &host, port, &body.target)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Graceful exit one second after the response is sent.
async fn terminate(State(state): State<ControlState>) -> Json<serde_json::Value> {
    info!("terminate requested");
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        let _ = shutdown.send(true);
    });
    Json(serde_json::json!({ "success": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::IpAllocator;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn fixture() -> (ControlState, Router, mpsc::UnboundedReceiver<Op>) {
        let table = Table::new(Arc::new(IpAllocator::new("10.42.0.0/16").unwrap()));
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let state = ControlState {
            table,
            ops: ops_tx,
            shutdown: shutdown_tx,
        };
        let router = router(state.clone());
        (state, router, ops_rx)
    }

    fn post(path: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn rack_host_endpoint_target_flow() {
        let (state, router, mut ops) = fixture();

        let response = router
            .clone()
            .oneshot(post("/racks", serde_json::json!({ "name": "rack1" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(post(
                "/racks/rack1/hosts",
                serde_json::json!({ "hostname": "web.myapp.rack1.convox" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(matches!(ops.try_recv(), Ok(Op::HostAdded { .. })));

        let response = router
            .clone()
            .oneshot(post(
                "/racks/rack1/hosts/web.myapp.rack1.convox/endpoints",
                serde_json::json!({ "protocol": "https", "port": 443 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(matches!(ops.try_recv(), Ok(Op::EndpointAdded { port: 443, .. })));

        let response = router
            .clone()
            .oneshot(post(
                "/racks/rack1/hosts/web.myapp.rack1.convox/endpoints/443/targets",
                serde_json::json!({ "target": "tls://10.0.0.1:8443" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let target = state
            .table
            .target_pick("rack1", "web.myapp.rack1.convox", 443)
            .unwrap();
        assert_eq!(target, "tls://10.0.0.1:8443");
    }

    #[tokio::test]
    async fn unknown_rack_is_404() {
        let (_state, router, _ops) = fixture();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/racks/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&body).contains("no such rack"));
    }

    #[tokio::test]
    async fn terminate_signals_shutdown() {
        let (state, router, _ops) = fixture();
        let mut shutdown_rx = state.shutdown.subscribe();

        let response = router
            .oneshot(post("/terminate", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        tokio::time::timeout(std::time::Duration::from_secs(3), shutdown_rx.changed())
            .await
            .expect("shutdown signal")
            .unwrap();
    }
}

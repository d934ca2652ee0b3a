//! Certificate handlers.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::HeaderMap;
use axum::Json;
use rack_core::options::CertificateCreateOptions;
use rack_core::types::Certificate;

use crate::error::ApiResult;
use crate::handlers::{ok, require};
use crate::params;
use crate::server::ApiState;

pub async fn list(State(state): State<ApiState>) -> ApiResult<Json<Vec<Certificate>>> {
    let mut certs = state.provider.certificate_list().await?;
    certs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Json(certs))
}

pub async fn create(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Certificate>> {
    let params = params::collect(query.as_deref(), &headers, &body);
    let public = require(&params, "public")?;
    let private = require(&params, "private")?;
    let opts = CertificateCreateOptions::decode(&params)?;
    Ok(Json(
        state.provider.certificate_create(&public, &private, opts).await?,
    ))
}

pub async fn generate(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Certificate>> {
    let params = params::collect(query.as_deref(), &headers, &body);
    let domains = require(&params, "domains")?
        .split(',')
        .map(str::to_string)
        .collect();
    Ok(Json(state.provider.certificate_generate(domains).await?))
}

pub async fn delete(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.provider.certificate_delete(&id).await?;
    Ok(ok())
}

//! Authentication and authorization.
//!
//! Two schemes coexist on every protected route: HTTP Basic with the
//! rack password (username ignored, constant-time comparison) and JWT
//! (username `jwt`, password is a bearer token verified against the
//! provider-supplied key). GET requires the read role, every other
//! method requires write.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::server::ApiState;

pub const AUTH_ERROR: &str = "invalid authentication";

/// Role attached to an authenticated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Read,
    ReadWrite,
}

impl Role {
    fn from_claim(claim: &str) -> ApiResult<Self> {
        match claim {
            "r" => Ok(Role::Read),
            "rw" => Ok(Role::ReadWrite),
            other => Err(ApiError::Unauthenticated(format!(
                "{AUTH_ERROR}: unknown role {other}"
            ))),
        }
    }
}

/// JWT claims carried by token auth.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub role: String,
    pub exp: u64,
}

/// Compare secrets without leaking length-prefix timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = (a.len() ^ b.len()) as u8;
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

/// Parse an HTTP Basic header into (username, password).
fn basic_credentials(headers: &HeaderMap) -> ApiResult<(String, String)> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthenticated(AUTH_ERROR.to_string()))?;
    let encoded = header
        .strip_prefix("Basic ")
        .ok_or_else(|| ApiError::Unauthenticated(AUTH_ERROR.to_string()))?;
    let decoded = BASE64
        .decode(encoded)
        .map_err(|_| ApiError::Unauthenticated(AUTH_ERROR.to_string()))?;
    let decoded =
        String::from_utf8(decoded).map_err(|_| ApiError::Unauthenticated(AUTH_ERROR.to_string()))?;
    let (user, pass) = decoded
        .split_once(':')
        .ok_or_else(|| ApiError::Unauthenticated(AUTH_ERROR.to_string()))?;
    Ok((user.to_string(), pass.to_string()))
}

/// Authenticate a request against the rack password or a JWT.
pub fn authenticate(state: &ApiState, headers: &HeaderMap) -> ApiResult<Role> {
    let Some(password) = &state.password else {
        // No password configured; the rack is open.
        return Ok(Role::ReadWrite);
    };

    let (user, pass) = basic_credentials(headers)?;

    if user == "jwt" {
        let token = decode::<Claims>(
            &pass,
            &DecodingKey::from_secret(state.jwt_key.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| ApiError::Unauthenticated(format!("{AUTH_ERROR}: {e}")))?;
        return Role::from_claim(&token.claims.role);
    }

    if constant_time_eq(pass.as_bytes(), password.as_bytes()) {
        Ok(Role::ReadWrite)
    } else {
        Err(ApiError::Unauthenticated(AUTH_ERROR.to_string()))
    }
}

/// Authorize a method for a role: GET needs read, the rest need write.
pub fn authorize(method: &Method, role: Role) -> ApiResult<()> {
    match (method, role) {
        (&Method::GET, _) => Ok(()),
        (_, Role::ReadWrite) => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

/// Middleware applied to every route. `/auth` authenticates but skips
/// authorization — it exists so clients can verify credentials.
pub async fn layer(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let role = authenticate(&state, request.headers())?;
    if request.uri().path() != "/auth" {
        authorize(request.method(), role)?;
    }
    let mut request = request;
    request.extensions_mut().insert(role);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_basic() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secres"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn basic_credentials_parse() {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            format!("Basic {}", BASE64.encode("user:pass")).parse().unwrap(),
        );
        let (user, pass) = basic_credentials(&headers).unwrap();
        assert_eq!(user, "user");
        assert_eq!(pass, "pass");
    }

    #[test]
    fn missing_header_is_invalid_authentication() {
        let err = basic_credentials(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.to_string(), AUTH_ERROR);
    }

    #[test]
    fn role_claims() {
        assert_eq!(Role::from_claim("r").unwrap(), Role::Read);
        assert_eq!(Role::from_claim("rw").unwrap(), Role::ReadWrite);
        assert!(Role::from_claim("admin").is_err());
    }

    #[test]
    fn authorize_by_method() {
        assert!(authorize(&Method::GET, Role::Read).is_ok());
        assert!(authorize(&Method::GET, Role::ReadWrite).is_ok());
        assert!(authorize(&Method::POST, Role::ReadWrite).is_ok());
        let err = authorize(&Method::POST, Role::Read).unwrap_err();
        assert_eq!(err.to_string(), "you are unauthorized to access this");
        assert!(authorize(&Method::DELETE, Role::Read).is_err());
    }
}

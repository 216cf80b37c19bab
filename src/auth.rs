//! API-key authentication middleware for the intake API. Constant-time
//! comparison prevents timing attacks against the key byte-by-byte.

use crate::config::ApiConfig;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AuthState {
    pub config: ApiConfig,
}

pub fn create_auth_state(config: ApiConfig) -> Arc<AuthState> {
    Arc::new(AuthState { config })
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "Unauthorized"})),
    )
        .into_response()
}

/// Accepts either `x-api-key: <key>` or `Authorization: Bearer <key>`.
/// CORS preflight (`OPTIONS`) always passes through unauthenticated.
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if method == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let Some(expected_key) = &auth_state.config.api_key else {
        // No key configured: authentication is a no-op (local/dev mode).
        return Ok(next.run(request).await);
    };

    let provided_key = if let Some(header_value) = headers.get("x-api-key") {
        header_value.to_str().map_err(|_| unauthorized())?
    } else if let Some(header_value) = headers.get("authorization") {
        let auth_str = header_value.to_str().map_err(|_| unauthorized())?;
        auth_str.strip_prefix("Bearer ").ok_or_else(unauthorized)?
    } else {
        debug!(%path, "request missing API key");
        return Err(unauthorized());
    };

    if provided_key.as_bytes().ct_eq(expected_key.as_bytes()).into() {
        Ok(next.run(request).await)
    } else {
        warn!(%path, "rejected request with invalid API key");
        Err(unauthorized())
    }
}

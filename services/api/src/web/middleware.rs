//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::web::response::ApiFailure;
use crate::web::state::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// The raw bearer credential of the request. Resolved by the gateway, not here.
#[derive(Clone, Debug)]
pub struct Credential(pub String);

/// Middleware that extracts the bearer credential from the `Authorization` header.
///
/// If present, inserts a [`Credential`] into request extensions for handlers to use.
/// If missing or malformed, returns 401 with code `TokenInvalid`.
pub async fn require_bearer(mut req: Request, next: Next) -> Result<Response, ApiFailure> {
    let credential = bearer_credential(req.headers())
        .ok_or_else(|| ApiFailure::from(guide_access_core::AccessError::TokenInvalid))?;
    req.extensions_mut().insert(Credential(credential));
    Ok(next.run(req).await)
}

fn bearer_credential(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Middleware that checks `x-admin-key` against the configured admin key.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiFailure> {
    let expected = state
        .config
        .admin_api_key
        .as_deref()
        .ok_or_else(|| ApiFailure::unauthorized("admin API is disabled"))?;
    if !header_matches(req.headers(), ADMIN_KEY_HEADER, expected) {
        return Err(ApiFailure::unauthorized("missing or wrong admin key"));
    }
    Ok(next.run(req).await)
}

/// Middleware that checks `x-webhook-secret` on payment provider callbacks.
pub async fn require_webhook_secret(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiFailure> {
    if !header_matches(req.headers(), WEBHOOK_SECRET_HEADER, &state.config.webhook_secret) {
        return Err(ApiFailure::unauthorized("missing or wrong webhook secret"));
    }
    Ok(next.run(req).await)
}

/// Compares without short-circuiting on the first differing byte.
fn header_matches(headers: &HeaderMap, name: &str, expected: &str) -> bool {
    let Some(given) = headers.get(name).map(|v| v.as_bytes()) else {
        return false;
    };
    let expected = expected.as_bytes();
    if given.len() != expected.len() {
        return false;
    }
    given
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

//! Bearer-secret auth for the cleanup endpoint.
//!
//! Relay has exactly one protected route: `POST /cleanup_stale_locks`
//! (spec.md §6.9). Every other route is open — agents authenticate to
//! GitHub, not to Relay. The middleware compares the request's
//! `Authorization: Bearer <token>` header against the configured cron
//! secret in constant time and rejects with 401 otherwise.

use axum::{extract::State, http::Request, middleware::Next, response::Response};

use crate::error::ServerError;
use crate::AppState;

fn extract_bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Constant-time byte comparison; avoids leaking secret length via timing
/// on the common path where lengths already differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Guards `/cleanup_stale_locks` against callers who don't know the cron
/// secret. Every other route bypasses this middleware entirely.
pub async fn cron_secret_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let provided = extract_bearer_token(req.headers()).unwrap_or_default();
    let expected = state.config.cron.secret.as_bytes();

    if !constant_time_eq(provided.as_bytes(), expected) {
        return Err(ServerError::Unauthorized);
    }

    Ok(next.run(req).await)
}

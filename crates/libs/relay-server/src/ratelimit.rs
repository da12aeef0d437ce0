//! Per-identity rate limiting over Relay's request plane.
//!
//! A single global quota, keyed by caller identity rather than tool name:
//! Relay has two tools, not dozens, so the teacher's write/read tool-category
//! split doesn't carry over. The bucket key prefers the caller's GitHub
//! identity (from `x-github-user`/`x-github-username`, the same headers
//! `relay_core::identity::Identity::resolve` reads) and falls back to the
//! client IP for callers who omit both.

use axum::extract::ConnectInfo;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DashMapStateStore};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

/// Rate limiter keyed by composite identity string: `{identity}:{ip}` for
/// requests carrying a GitHub identity header, or just `{ip}` otherwise.
type KeyedRateLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub limiter: Arc<KeyedRateLimiter>,
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        let enabled = std::env::var("RATE_LIMIT_ENABLED").unwrap_or_else(|_| "true".into()) == "true";

        let rps = std::env::var("RATE_LIMIT_RPS")
            .unwrap_or_else(|_| "50".into())
            .parse::<u32>()
            .unwrap_or(50);

        let burst = std::env::var("RATE_LIMIT_BURST")
            .unwrap_or_else(|_| "100".into())
            .parse::<u32>()
            .unwrap_or(100);

        let quota = Quota::per_second(NonZeroU32::new(rps.max(1)).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst.max(1)).unwrap_or(NonZeroU32::MIN));

        let limiter = Arc::new(RateLimiter::keyed(quota));

        tracing::info!(enabled, rps, burst, "rate limiting configured");

        Self { limiter, enabled }
    }
}

/// Pulls the caller's GitHub identity from the headers `relay_core`'s
/// identity resolution reads, preferring `x-github-user`.
fn identity_from_headers(req: &Request) -> Option<String> {
    req.headers()
        .get("x-github-user")
        .or_else(|| req.headers().get("x-github-username"))
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Construct the rate limit bucket key: `{identity}:{ip}` when an identity
/// header is present, `{ip}` otherwise.
pub fn get_bucket_key(req: &Request, client_ip: std::net::IpAddr) -> String {
    match identity_from_headers(req) {
        Some(identity) => format!("{identity}:{client_ip}"),
        None => client_ip.to_string(),
    }
}

pub async fn rate_limit_middleware(
    State(config): State<RateLimitConfig>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !config.enabled {
        return Ok(next.run(req).await);
    }

    let ip = if let Some(forwarded) = req.headers().get("x-forwarded-for") {
        forwarded
            .to_str()
            .ok()
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<std::net::IpAddr>().ok())
            .unwrap_or(peer.ip())
    } else {
        peer.ip()
    };

    let bucket_key = get_bucket_key(&req, ip);

    match config.limiter.check_key(&bucket_key) {
        Ok(_) => Ok(next.run(req).await),
        Err(_) => {
            warn!(bucket_key = %bucket_key, "rate limit exceeded");
            Err(StatusCode::TOO_MANY_REQUESTS)
        }
    }
}

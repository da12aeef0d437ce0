//! Relay's request plane: assembles `relay-core`'s components behind REST
//! (spec.md §6.1-6.7) and JSON-RPC/SSE (spec.md §6.8) surfaces.
//!
//! Ported from the teacher's `lib-server::run` — same metrics/CORS/security-
//! header/rate-limit/graceful-shutdown shape, generalized from a single
//! `ModelManager` database handle to the three components (`KvStore`,
//! `RemoteRepoClient`, and the lock/graph/activity stores built on top of
//! them) Relay's request plane actually depends on.

pub mod api;
pub mod auth;
pub mod deadline;
pub mod error;
pub mod mcp;
pub mod metrics;
pub mod ratelimit;

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::http::header::{HeaderName, HeaderValue};
use axum::routing::get;
use axum::{Router, extract::State, http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use relay_core::activity::ActivityLog;
use relay_core::graph::GraphStore;
use relay_core::kv::{KvStore, RedisKv};
use relay_core::locks::LockRegistry;
use relay_core::remote::{GitHubRemoteClient, SharedRemoteClient};
use relay_common::RelayConfig;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

pub use error::ServerError;

/// Shared application state threaded through every handler and the MCP
/// dispatcher alike.
#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub kv: Arc<dyn KvStore>,
    pub remote: SharedRemoteClient,
    pub locks: Arc<LockRegistry>,
    pub graph: Arc<GraphStore>,
    pub activity: Arc<ActivityLog>,
    pub metrics_handle: PrometheusHandle,
    pub start_time: Instant,
    pub ratelimit_config: ratelimit::RateLimitConfig,
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn setup_metrics() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            const EXPONENTIAL_SECONDS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

            PrometheusBuilder::new()
                .set_buckets_for_metric(Matcher::Full("http_request_duration_seconds".to_string()), EXPONENTIAL_SECONDS)
                .expect("failed to set metrics buckets")
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

/// Builds the shared components and runs the server to completion (or until
/// a shutdown signal arrives). Tracing is initialized by the caller, as in
/// the teacher's `lib-server::run`.
pub async fn run(config: RelayConfig) -> Result<(), ServerError> {
    let metrics_handle = setup_metrics();

    let kv: Arc<dyn KvStore> = Arc::new(
        RedisKv::connect(&config.kv.url, config.kv.token.as_deref())
            .await
            .map_err(ServerError::Core)?,
    );
    let remote: SharedRemoteClient = Arc::new(
        GitHubRemoteClient::new(config.remote.token.clone()).map_err(ServerError::Core)?,
    );

    let locks = Arc::new(LockRegistry::new(kv.clone()));
    let graph = Arc::new(GraphStore::new(kv.clone(), remote.clone(), locks.clone()));
    let activity = Arc::new(ActivityLog::new(kv.clone()));

    let config = Arc::new(config);
    let port = config.server.port;

    let app_state = AppState {
        config,
        kv,
        remote,
        locks,
        graph,
        activity,
        metrics_handle,
        start_time: Instant::now(),
        ratelimit_config: ratelimit::RateLimitConfig::new(),
    };

    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "Relay server starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Core(relay_core::Error::internal(e.to_string())))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::Core(relay_core::Error::internal(e.to_string())))?;

    Ok(())
}

/// Assembles the full router. Split out from [`run`] so tests can build one
/// against an injected in-memory/mock `AppState` without binding a socket.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let cleanup_routes = Router::new()
        .route("/cleanup_stale_locks", get(api::cleanup_stale_locks))
        .route_layer(axum::middleware::from_fn_with_state(app_state.clone(), auth::cron_secret_middleware));

    let app = Router::new()
        .merge(api::routes())
        .merge(cleanup_routes)
        .merge(mcp::routes())
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/", get(root_handler))
        .layer(TraceLayer::new_for_http())
        .route_layer(axum::middleware::from_fn_with_state(app_state.clone(), ratelimit::rate_limit_middleware))
        .route_layer(axum::middleware::from_fn(metrics::track_metrics))
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("content-security-policy"),
            HeaderValue::from_static("default-src 'none'"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ));

    app.with_state(app_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}

async fn root_handler() -> &'static str {
    "Relay coordination server is running"
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.kv.get("__relay_ready_probe__").await {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}

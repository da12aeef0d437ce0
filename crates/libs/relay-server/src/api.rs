//! The seven plain-JSON endpoints (spec.md §6.1-6.7).
//!
//! Each handler resolves identity and namespace, gathers whatever state the
//! orchestration engine needs, and hands the decision off to
//! `relay_core::orchestration` — handlers themselves make no business
//! decisions, only I/O and shape translation.
//!
//! `check_status_impl`/`post_status_impl` are split out from their axum
//! handlers so `crate::mcp`'s `tools/call` dispatch can invoke the exact same
//! logic in-process with an already-resolved [`Identity`], instead of
//! round-tripping through HTTP.

use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use relay_core::activity::{ActivityEvent, ActivityStatus};
use relay_core::graph::Graph;
use relay_core::identity::{Identity, now_ms};
use relay_core::locks::{AcquireOutcome, AcquireRequest, Lock, LockStatus};
use relay_core::namespace::{namespace_key, normalize_repo_url, parse_repo_coordinates};
use relay_core::orchestration::{
    check_status_label, classify_locks, decide_check_status, decide_post_status_acquire_conflict,
    decide_post_status_acquire_success, decide_post_status_open_push_needed,
    decide_post_status_open_release_failure, decide_post_status_open_release_success,
    decide_post_status_stale, OrchestrationCommand,
};
use relay_core::Error as CoreError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{Result, ServerError};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/check_status", post(check_status))
        .route("/post_status", post(post_status))
        .route("/graph", get(graph))
        .route("/activity", get(activity))
        .route("/release_all_locks", post(release_all_locks))
        .route("/clear_agent_and_feed", post(clear_agent_and_feed))
}

fn lock_key(ns: &str) -> String {
    format!("locks:{ns}")
}

fn identity_headers(headers: &axum::http::HeaderMap) -> (Option<String>, Option<String>) {
    let user = headers
        .get("x-github-user")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let username = headers
        .get("x-github-username")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    (user, username)
}

fn lock_view(lock: &Lock, lock_type: &'static str) -> LockView<'_> {
    LockView {
        file_path: &lock.file_path,
        user_id: &lock.user_id,
        user_name: &lock.user_name,
        status: lock.status,
        agent_head: &lock.agent_head,
        message: &lock.message,
        timestamp: lock.timestamp,
        expiry: lock.expiry,
        user: &lock.user_id,
        lock_type,
    }
}

#[derive(Serialize)]
struct LockView<'a> {
    file_path: &'a str,
    user_id: &'a str,
    user_name: &'a str,
    status: LockStatus,
    agent_head: &'a str,
    message: &'a str,
    timestamp: u64,
    expiry: u64,
    user: &'a str,
    lock_type: &'static str,
}

// ---------------------------------------------------------------------
// POST /check_status
// ---------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CheckStatusRequest {
    #[serde(default)]
    pub(crate) repo_url: String,
    #[serde(default)]
    pub(crate) branch: String,
    #[serde(default)]
    pub(crate) file_paths: Vec<String>,
    #[serde(default)]
    pub(crate) agent_head: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct CheckStatusResponse {
    pub(crate) status: &'static str,
    pub(crate) repo_head: String,
    pub(crate) locks: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) warnings: Vec<String>,
    pub(crate) orchestration: OrchestrationCommand,
}

fn validate_non_empty(body_has_fields: bool) -> Result<()> {
    if !body_has_fields {
        return Err(ServerError::Core(CoreError::validation("Missing required fields")));
    }
    Ok(())
}

/// The logic behind `POST /check_status`, shared by the HTTP handler and
/// `crate::mcp`'s `tools/call` dispatch (spec.md §4.10).
pub(crate) async fn check_status_impl(
    state: &AppState,
    identity: &Identity,
    req: &CheckStatusRequest,
) -> Result<CheckStatusResponse> {
    validate_non_empty(
        !req.repo_url.is_empty() && !req.branch.is_empty() && !req.agent_head.is_empty() && !req.file_paths.is_empty(),
    )?;

    let coords = parse_repo_coordinates(&req.repo_url)?;
    let normalized = normalize_repo_url(&req.repo_url)?;
    let ns = namespace_key(&normalized, &req.branch);
    let lock_ns = lock_key(&ns);
    let now = now_ms();

    let (remote_head, graph_opt, locks) = crate::deadline::with_deadline(state.config.request.deadline_ms, async {
        let remote_head = state.remote.get_branch_head(&coords, &req.branch).await?;
        let (graph_opt, locks) = match state.graph.get_cached(&ns, &lock_ns, now).await? {
            Some((graph, locks)) => (Some(graph), locks),
            None => (None, state.locks.list(&lock_ns, now).await?),
        };
        Ok((remote_head, graph_opt, locks))
    })
    .await?;

    let neighbors_fn = |path: &str| -> HashSet<String> {
        graph_opt.as_ref().map(|g: &Graph| g.neighbors_of(path)).unwrap_or_default()
    };
    let classified = classify_locks(&locks, &req.file_paths, neighbors_fn);

    let orchestration = decide_check_status(&identity.user_id, &req.agent_head, &remote_head, &classified);
    let label = check_status_label(&req.agent_head, &remote_head, &classified, &identity.user_id);

    let locks_json: HashMap<String, serde_json::Value> = classified
        .iter()
        .map(|c| {
            let kind = match c.kind {
                relay_core::orchestration::LockKind::Direct => "DIRECT",
                relay_core::orchestration::LockKind::Neighbor => "NEIGHBOR",
            };
            (c.path.to_string(), serde_json::to_value(lock_view(c.lock, kind)).unwrap_or(serde_json::Value::Null))
        })
        .collect();

    let warnings = if label == "STALE" {
        vec![format!("STALE_BRANCH: Your branch is behind origin/{}", req.branch)]
    } else {
        Vec::new()
    };

    Ok(CheckStatusResponse {
        status: label,
        repo_head: remote_head,
        locks: locks_json,
        warnings,
        orchestration,
    })
}

async fn check_status(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<CheckStatusRequest>,
) -> Result<impl IntoResponse> {
    let (gh_user, gh_username) = identity_headers(&headers);
    let identity = Identity::resolve(gh_user.as_deref(), gh_username.as_deref(), false)?;
    let resp = check_status_impl(&state, &identity, &req).await?;
    Ok(Json(resp))
}

// ---------------------------------------------------------------------
// POST /post_status
// ---------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PostStatusRequest {
    #[serde(default)]
    pub(crate) repo_url: String,
    #[serde(default)]
    pub(crate) branch: String,
    #[serde(default)]
    pub(crate) file_paths: Vec<String>,
    #[serde(default)]
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) agent_head: Option<String>,
    #[serde(default)]
    pub(crate) new_repo_head: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PostStatusResponse {
    pub(crate) success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) locks: Option<Vec<Lock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) orphaned_dependencies: Option<Vec<String>>,
    pub(crate) orchestration: OrchestrationCommand,
}

/// The logic behind `POST /post_status`, shared by the HTTP handler and
/// `crate::mcp`'s `tools/call` dispatch. Returns the HTTP status the caller
/// should answer with alongside the body — every branch except release
/// failure is 200, matching spec.md §6.2.
pub(crate) async fn post_status_impl(
    state: &AppState,
    identity: &Identity,
    req: &PostStatusRequest,
) -> Result<(StatusCode, PostStatusResponse)> {
    validate_non_empty(
        !req.repo_url.is_empty() && !req.branch.is_empty() && !req.file_paths.is_empty() && !req.status.is_empty(),
    )?;

    let is_open = req.status == "OPEN";
    let status = match req.status.as_str() {
        "OPEN" => None,
        "READING" => Some(LockStatus::Reading),
        "WRITING" => Some(LockStatus::Writing),
        other => return Err(ServerError::Core(CoreError::validation(format!("Unknown status: {other}")))),
    };

    if !is_open && req.agent_head.as_deref().unwrap_or("").is_empty() {
        return Err(ServerError::Core(CoreError::validation("agent_head is required for READING/WRITING")));
    }

    let normalized = normalize_repo_url(&req.repo_url)?;
    let ns = namespace_key(&normalized, &req.branch);
    let lock_ns = lock_key(&ns);
    let now = now_ms();

    if is_open {
        return handle_open(state, &ns, &lock_ns, req, identity, now).await;
    }
    let status = status.expect("status is Some for READING/WRITING");

    if req.status == "WRITING" {
        let coords = parse_repo_coordinates(&req.repo_url)?;
        let remote_head =
            crate::deadline::with_deadline(state.config.request.deadline_ms, state.remote.get_branch_head(&coords, &req.branch)).await?;
        if req.agent_head.as_deref() != Some(remote_head.as_str()) {
            return Ok((
                StatusCode::OK,
                PostStatusResponse {
                    success: false,
                    locks: None,
                    orphaned_dependencies: None,
                    orchestration: decide_post_status_stale(),
                },
            ));
        }
    }

    let outcome = crate::deadline::with_deadline(
        state.config.request.deadline_ms,
        state.locks.acquire(AcquireRequest {
            namespace_key: lock_ns.clone(),
            paths: req.file_paths.clone(),
            user_id: identity.user_id.clone(),
            user_name: identity.user_name.clone(),
            status,
            agent_head: req.agent_head.clone().unwrap_or_default(),
            message: req.message.clone(),
            now,
        }),
    )
    .await?;

    match outcome {
        AcquireOutcome::Conflict { conflicting_file, conflicting_user } => Ok((
            StatusCode::OK,
            PostStatusResponse {
                success: false,
                locks: None,
                orphaned_dependencies: None,
                orchestration: decide_post_status_acquire_conflict(&conflicting_file, &conflicting_user),
            },
        )),
        AcquireOutcome::Success { locks } => {
            let activity_status = if req.status == "WRITING" { ActivityStatus::Writing } else { ActivityStatus::Reading };
            push_activity(state, &ns, &req.file_paths, identity, activity_status, &req.message, now).await?;
            Ok((
                StatusCode::OK,
                PostStatusResponse {
                    success: true,
                    locks: Some(locks),
                    orphaned_dependencies: None,
                    orchestration: decide_post_status_acquire_success(),
                },
            ))
        }
    }
}

async fn post_status(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<PostStatusRequest>,
) -> Result<axum::response::Response> {
    let (gh_user, gh_username) = identity_headers(&headers);
    let identity = Identity::resolve(gh_user.as_deref(), gh_username.as_deref(), false)?;
    let (status, resp) = post_status_impl(&state, &identity, &req).await?;
    Ok((status, Json(resp)).into_response())
}

async fn handle_open(
    state: &AppState,
    ns: &str,
    lock_ns: &str,
    req: &PostStatusRequest,
    identity: &Identity,
    now: u64,
) -> Result<(StatusCode, PostStatusResponse)> {
    if let (Some(new_head), Some(agent_head)) = (&req.new_repo_head, &req.agent_head) {
        if new_head == agent_head {
            return Ok((
                StatusCode::OK,
                PostStatusResponse {
                    success: false,
                    locks: None,
                    orphaned_dependencies: None,
                    orchestration: decide_post_status_open_push_needed(),
                },
            ));
        }
    }

    let released: HashSet<String> = req.file_paths.iter().cloned().collect();

    match state.locks.release(lock_ns, &req.file_paths, &identity.user_id).await {
        Ok(()) => {
            push_activity(state, ns, &req.file_paths, identity, ActivityStatus::Open, &req.message, now).await?;

            let orphaned = match state.graph.get_cached(ns, lock_ns, now).await? {
                Some((graph, _)) => graph.orphaned_dependencies(&released),
                None => Vec::new(),
            };

            Ok((
                StatusCode::OK,
                PostStatusResponse {
                    success: true,
                    locks: None,
                    orphaned_dependencies: Some(orphaned),
                    orchestration: decide_post_status_open_release_success(),
                },
            ))
        }
        Err(e) => Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            PostStatusResponse {
                success: false,
                locks: None,
                orphaned_dependencies: None,
                orchestration: decide_post_status_open_release_failure(e.to_string()),
            },
        )),
    }
}

async fn push_activity(
    state: &AppState,
    ns: &str,
    file_paths: &[String],
    identity: &Identity,
    status: ActivityStatus,
    message: &str,
    now: u64,
) -> Result<()> {
    let events: Vec<ActivityEvent> = file_paths
        .iter()
        .enumerate()
        .map(|(i, path)| ActivityEvent {
            id: ActivityEvent::new_id(now, &identity.user_id, status, path, i),
            file_path: path.clone(),
            user_id: identity.user_id.clone(),
            user_name: identity.user_name.clone(),
            status,
            message: message.to_string(),
            timestamp: now,
        })
        .collect();
    state.activity.push(ns, &events).await?;
    Ok(())
}

// ---------------------------------------------------------------------
// GET /graph
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct GraphQuery {
    repo_url: String,
    branch: String,
    #[serde(default)]
    regenerate: bool,
}

async fn graph(State(state): State<AppState>, Query(q): Query<GraphQuery>) -> Result<impl IntoResponse> {
    let coords = parse_repo_coordinates(&q.repo_url)?;
    let normalized = normalize_repo_url(&q.repo_url)?;
    let ns = namespace_key(&normalized, &q.branch);
    let lock_ns = lock_key(&ns);
    let now = now_ms();

    let (graph, locks) = crate::deadline::with_deadline(
        state.config.request.graph_build_deadline_ms,
        state.graph.generate(&ns, &lock_ns, &coords, &q.branch, q.regenerate, now),
    )
    .await?;

    Ok(Json(serde_json::json!({
        "nodes": graph.nodes,
        "edges": graph.edges,
        "version": graph.version,
        "metadata": graph.metadata,
        "locks": locks,
    })))
}

// ---------------------------------------------------------------------
// GET /activity
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct ActivityQuery {
    repo_url: String,
    branch: String,
    #[serde(default)]
    limit: Option<usize>,
}

async fn activity(State(state): State<AppState>, Query(q): Query<ActivityQuery>) -> Result<impl IntoResponse> {
    let normalized = normalize_repo_url(&q.repo_url)?;
    let ns = namespace_key(&normalized, &q.branch);
    let limit = q.limit.unwrap_or(relay_core::activity::DEFAULT_READ_LIMIT).min(relay_core::activity::MAX_READ_LIMIT);

    let events = state.activity.read(&ns, limit).await?;

    let mut response = Json(serde_json::json!({ "activity_events": events })).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store, max-age=0"));
    Ok(response)
}

// ---------------------------------------------------------------------
// POST /release_all_locks
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct RepoBranchRequest {
    repo_url: String,
    branch: String,
}

async fn release_all_locks(State(state): State<AppState>, Json(req): Json<RepoBranchRequest>) -> Result<impl IntoResponse> {
    let normalized = normalize_repo_url(&req.repo_url)?;
    let ns = namespace_key(&normalized, &req.branch);
    let lock_ns = lock_key(&ns);

    let released = state.locks.release_all(&lock_ns).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "released": released,
        "repo_url": req.repo_url,
        "branch": req.branch,
    })))
}

// ---------------------------------------------------------------------
// POST /clear_agent_and_feed
// ---------------------------------------------------------------------

async fn clear_agent_and_feed(State(state): State<AppState>, Json(req): Json<RepoBranchRequest>) -> Result<impl IntoResponse> {
    let normalized = normalize_repo_url(&req.repo_url)?;
    let ns = namespace_key(&normalized, &req.branch);
    let lock_ns = lock_key(&ns);

    let locks_cleared = state.locks.release_all(&lock_ns).await;
    let feed_cleared = state.activity.clear(&ns).await;

    match (locks_cleared, feed_cleared) {
        (Ok(locks_cleared), Ok(feed_cleared)) => Ok(Json(serde_json::json!({
            "success": true,
            "locks_cleared": locks_cleared,
            "feed_cleared": feed_cleared,
        }))
        .into_response()),
        (locks_result, feed_result) => {
            let locks_cleared = locks_result.unwrap_or(0);
            let feed_cleared = feed_result.unwrap_or(0);
            Ok((
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "success": false,
                    "locks_cleared": locks_cleared,
                    "feed_cleared": feed_cleared,
                })),
            )
                .into_response())
        }
    }
}

// ---------------------------------------------------------------------
// POST /cleanup_stale_locks (spec.md §6.7/§4.11) — bearer-secret protected,
// mounted separately in relay_server::build_router behind cron_secret_middleware.
// ---------------------------------------------------------------------

#[derive(Serialize)]
pub struct CleanupResponse {
    pub namespaces_scanned: usize,
    pub locks_removed: u64,
}

/// Sweeps every known lock namespace for expired fields. Intended to be
/// invoked on a schedule (cron) rather than per-request — `list()` already
/// prunes opportunistically on read, but namespaces nobody is actively
/// polling would otherwise never shed their expired locks.
pub async fn cleanup_stale_locks(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let now = now_ms();
    let namespaces = state.kv.scan_keys("locks:*").await?;

    let mut locks_removed = 0u64;
    for namespace in &namespaces {
        locks_removed += state.locks.cleanup_expired(namespace, now).await?;
    }

    Ok(Json(CleanupResponse {
        namespaces_scanned: namespaces.len(),
        locks_removed,
    }))
}

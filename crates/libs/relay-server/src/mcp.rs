//! JSON-RPC/SSE tool-call surface at `/mcp` (spec.md §4.10, §6.8).
//!
//! Hand-rolled rather than built on an MCP transport crate: Relay exposes
//! exactly two tools and a handful of protocol methods, so a small dispatcher
//! over `relay_mcp::schema`/`relay_mcp::adapter` plus `crate::api`'s impl
//! functions is less machinery than bridging through a generic streamable-
//! HTTP server abstraction built for tool fleets much larger than this one.
//!
//! Methods: `initialize`, `tools/list`, `tools/call`, `ping`. Any method
//! under `notifications/` gets 202 with no body. Everything else is wrapped
//! as a `text/event-stream` frame: `event: message\ndata: <json>\n\n`.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use relay_core::identity::Identity;
use relay_core::Error as CoreError;
use relay_mcp::adapter::{self, ToolKind};
use relay_mcp::schema::tool_schemas;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::{CheckStatusRequest, PostStatusRequest, check_status_impl, post_status_impl};
use crate::AppState;

/// Fixed protocol version string returned from `initialize` — Relay speaks
/// to one known family of agent clients, so this never varies by config.
const PROTOCOL_VERSION: &str = "2024-11-05";

pub fn routes() -> Router<AppState> {
    Router::new().route("/mcp", get(mcp_get).post(mcp_post))
}

fn accept_is_valid(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    accept.contains("application/json") && accept.contains("text/event-stream")
}

fn sse_frame(body: &Value) -> Response {
    let data = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = format!("event: message\ndata: {data}\n\n").into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response
}

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// `GET /mcp` — handshake. Returns an empty SSE comment frame per spec.md §6.8.
async fn mcp_get() -> Response {
    let mut response = ": relay mcp handshake\n\n".into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default = "default_id")]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

fn default_id() -> Value {
    Value::Null
}

/// `POST /mcp` — dispatches a single JSON-RPC request.
async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if !accept_is_valid(&headers) {
        return (
            StatusCode::NOT_ACCEPTABLE,
            Json(rpc_error(Value::Null, -32600, "Accept header must include application/json and text/event-stream")),
        )
            .into_response();
    }

    let req: RpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return sse_frame(&rpc_error(Value::Null, -32700, &format!("Parse error: {e}"))),
    };

    if req.method.starts_with("notifications/") {
        return StatusCode::ACCEPTED.into_response();
    }

    match req.method.as_str() {
        "initialize" => sse_frame(&rpc_result(
            req.id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "relay", "version": env!("CARGO_PKG_VERSION") },
            }),
        )),
        "ping" => sse_frame(&rpc_result(req.id, json!({}))),
        "tools/list" => sse_frame(&rpc_result(req.id, json!({ "tools": tool_schemas() }))),
        "tools/call" => dispatch_tool_call(&state, req.id, req.params).await,
        other => sse_frame(&rpc_error(req.id, -32601, &format!("Method not found: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

async fn dispatch_tool_call(state: &AppState, id: Value, params: Value) -> Response {
    let call: ToolCallParams = match serde_json::from_value(params) {
        Ok(c) => c,
        Err(e) => return sse_frame(&rpc_error(id, -32602, &format!("Invalid params: {e}"))),
    };

    match call.name.as_str() {
        "check_status" => sse_frame(&call_check_status(state, id, call.arguments).await),
        "post_status" => sse_frame(&call_post_status(state, id, call.arguments).await),
        other => sse_frame(&rpc_error(id, -32602, &format!("Unknown tool: {other}"))),
    }
}

/// Arguments common to both tools, as agents actually send them.
#[derive(Debug, Default, Deserialize)]
struct CommonArgs {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    repo_url: Option<String>,
    #[serde(default)]
    branch: Option<String>,
}

fn tool_result_envelope(body: Value) -> Value {
    json!({
        "content": [{ "type": "text", "text": serde_json::to_string(&body).unwrap_or_default() }],
        "structuredContent": body,
    })
}

fn canonicalize_repo_url(state: &AppState, repo_url: &str) -> String {
    state
        .config
        .server
        .canonical_repo_url
        .clone()
        .unwrap_or_else(|| repo_url.to_string())
}

async fn call_check_status(state: &AppState, id: Value, args: Value) -> Value {
    let common: CommonArgs = serde_json::from_value(args.clone()).unwrap_or_default();
    let mut req: CheckStatusRequest = match serde_json::from_value(args) {
        Ok(r) => r,
        Err(e) => return rpc_error(id, -32602, &format!("Invalid check_status arguments: {e}")),
    };

    let identity = Identity {
        user_id: adapter::normalize_username(common.username.as_deref()),
        user_name: adapter::normalize_username(common.username.as_deref()),
    };
    if let Some(repo_url) = &common.repo_url {
        req.repo_url = canonicalize_repo_url(state, repo_url);
    }

    let branch_was_supplied = common.branch.as_deref().is_some_and(|b| !b.trim().is_empty());
    if !branch_was_supplied {
        req.branch = adapter::DEFAULT_BRANCH.to_string();
    }

    match check_status_impl(state, &identity, &req).await {
        Ok(resp) => rpc_result(id, tool_result_envelope(serde_json::to_value(resp).unwrap_or(Value::Null))),
        Err(e) => {
            let core_err = server_error_to_core(&e);
            if adapter::should_retry_with_fallback_branch(branch_was_supplied, core_err) {
                req.branch = adapter::FALLBACK_BRANCH.to_string();
                return match check_status_impl(state, &identity, &req).await {
                    Ok(resp) => rpc_result(id, tool_result_envelope(serde_json::to_value(resp).unwrap_or(Value::Null))),
                    Err(e2) => error_to_rpc_result(id, &e2, ToolKind::CheckStatus),
                };
            }
            error_to_rpc_result(id, &e, ToolKind::CheckStatus)
        }
    }
}

async fn call_post_status(state: &AppState, id: Value, args: Value) -> Value {
    let common: CommonArgs = serde_json::from_value(args.clone()).unwrap_or_default();
    let mut req: PostStatusRequest = match serde_json::from_value(args) {
        Ok(r) => r,
        Err(e) => return rpc_error(id, -32602, &format!("Invalid post_status arguments: {e}")),
    };

    let identity = Identity {
        user_id: adapter::normalize_username(common.username.as_deref()),
        user_name: adapter::normalize_username(common.username.as_deref()),
    };
    if let Some(repo_url) = &common.repo_url {
        req.repo_url = canonicalize_repo_url(state, repo_url);
    }

    let branch_was_supplied = common.branch.as_deref().is_some_and(|b| !b.trim().is_empty());
    if !branch_was_supplied {
        req.branch = adapter::DEFAULT_BRANCH.to_string();
    }

    match post_status_impl(state, &identity, &req).await {
        Ok((_, resp)) => rpc_result(id, tool_result_envelope(serde_json::to_value(resp).unwrap_or(Value::Null))),
        Err(e) => {
            let core_err = server_error_to_core(&e);
            if adapter::should_retry_with_fallback_branch(branch_was_supplied, core_err) {
                req.branch = adapter::FALLBACK_BRANCH.to_string();
                return match post_status_impl(state, &identity, &req).await {
                    Ok((_, resp)) => rpc_result(id, tool_result_envelope(serde_json::to_value(resp).unwrap_or(Value::Null))),
                    Err(e2) => error_to_rpc_result(id, &e2, ToolKind::PostStatus),
                };
            }
            error_to_rpc_result(id, &e, ToolKind::PostStatus)
        }
    }
}

fn server_error_to_core(e: &crate::error::ServerError) -> &CoreError {
    match e {
        crate::error::ServerError::Core(core) => core,
        crate::error::ServerError::Unauthorized => {
            // Unreachable from check_status_impl/post_status_impl, which never
            // raise Unauthorized; fall through with a generic internal marker.
            static UNAUTH: CoreError = CoreError::InternalError(String::new());
            &UNAUTH
        }
    }
}

fn status_for(e: &crate::error::ServerError) -> u16 {
    match e {
        crate::error::ServerError::Core(CoreError::Validation(_)) | crate::error::ServerError::Core(CoreError::IdentityUnresolved) => 400,
        crate::error::ServerError::Core(CoreError::QuotaExhausted { .. }) => 429,
        crate::error::ServerError::Unauthorized => 401,
        crate::error::ServerError::Core(_) => 500,
    }
}

fn error_to_rpc_result(id: Value, e: &crate::error::ServerError, kind: ToolKind) -> Value {
    let status = status_for(e);
    let core_err = server_error_to_core(e);
    let envelope = adapter::map_error_to_envelope(status, core_err, kind);
    rpc_result(id, tool_result_envelope(serde_json::to_value(envelope).unwrap_or(Value::Null)))
}

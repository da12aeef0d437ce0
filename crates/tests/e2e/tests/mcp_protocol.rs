//! `/mcp` JSON-RPC/SSE surface (spec.md §4.10, §6.8, §8).

use http_body_util::BodyExt;
use relay_core::namespace::parse_repo_coordinates;
use relay_e2e_tests::{FakeRemoteClient, TestHarness};
use serde_json::{json, Value};
use tower::ServiceExt;

const REPO: &str = "https://github.com/acme/widgets";

async fn post_mcp(harness: &TestHarness, accept: Option<&str>, body: Value) -> (axum::http::StatusCode, String, Value) {
    let mut builder = axum::http::Request::builder().method("POST").uri("/mcp").header("content-type", "application/json");
    if let Some(accept) = accept {
        builder = builder.header("accept", accept);
    }
    let req = builder.body(axum::body::Body::from(serde_json::to_vec(&body).unwrap())).unwrap();
    let resp = harness.router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let raw = String::from_utf8(bytes.to_vec()).unwrap();

    // SSE frames are "event: message\ndata: <json>\n\n"; JSON error frames from
    // the bad-Accept-header path are returned directly without SSE framing.
    let json_part = raw.strip_prefix("event: message\ndata: ").map(|s| s.trim_end()).unwrap_or(raw.trim());
    let parsed: Value = serde_json::from_str(json_part).unwrap_or(Value::Null);
    (status, raw, parsed)
}

#[tokio::test]
async fn bad_accept_header_is_rejected_with_jsonrpc_invalid_request() {
    let harness = TestHarness::new(FakeRemoteClient::new());

    let (status, _raw, body) = post_mcp(
        &harness,
        Some("application/json"),
        json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }),
    )
    .await;

    assert_eq!(status, axum::http::StatusCode::NOT_ACCEPTABLE);
    assert_eq!(body["error"]["code"], -32600);
}

#[tokio::test]
async fn initialize_reports_protocol_version_and_tool_capability() {
    let harness = TestHarness::new(FakeRemoteClient::new());

    let (status, _raw, body) = post_mcp(
        &harness,
        Some("application/json, text/event-stream"),
        json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }),
    )
    .await;

    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    assert!(body["result"]["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn tools_list_returns_check_status_and_post_status() {
    let harness = TestHarness::new(FakeRemoteClient::new());

    let (_, _raw, body) = post_mcp(
        &harness,
        Some("application/json, text/event-stream"),
        json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }),
    )
    .await;

    let tools = body["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"check_status"));
    assert!(names.contains(&"post_status"));
}

#[tokio::test]
async fn notifications_are_acknowledged_without_a_body() {
    let harness = TestHarness::new(FakeRemoteClient::new());

    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("accept", "application/json, text/event-stream")
        .body(axum::body::Body::from(
            serde_json::to_vec(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })).unwrap(),
        ))
        .unwrap();
    let resp = harness.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::ACCEPTED);
}

#[tokio::test]
async fn tools_call_check_status_retries_master_with_main_exactly_once() {
    let coords = parse_repo_coordinates(REPO).unwrap();
    // Only "main" resolves; a default "master" lookup fails BranchNotFound,
    // which should trigger exactly one fallback retry per spec.md §4.10.
    let remote = FakeRemoteClient::new().with_head(&coords, "main", "head1");
    let harness = TestHarness::new(remote);

    let (status, _raw, body) = post_mcp(
        &harness,
        Some("application/json, text/event-stream"),
        json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {
                "name": "check_status",
                "arguments": {
                    "username": "alice",
                    "repo_url": REPO,
                    "file_paths": ["src/app.ts"],
                    "agent_head": "head1",
                },
            },
        }),
    )
    .await;

    assert_eq!(status, axum::http::StatusCode::OK);
    let structured = &body["result"]["structuredContent"];
    assert_eq!(structured["status"], "OK");
    assert_eq!(structured["repo_head"], "head1");
}

#[tokio::test]
async fn tools_call_with_unknown_tool_name_is_a_jsonrpc_invalid_params_error() {
    let harness = TestHarness::new(FakeRemoteClient::new());

    let (status, _raw, body) = post_mcp(
        &harness,
        Some("application/json, text/event-stream"),
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": { "name": "not_a_real_tool", "arguments": {} },
        }),
    )
    .await;

    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(body["error"]["code"], -32602);
}

//! `POST /check_status` scenarios (spec.md §6.1, §8).

use http_body_util::BodyExt;
use relay_core::locks::{Lock, LockStatus};
use relay_core::namespace::{namespace_key, normalize_repo_url};
use relay_e2e_tests::{FakeRemoteClient, TestHarness};
use serde_json::{json, Value};
use tower::ServiceExt;

const REPO: &str = "https://github.com/acme/widgets";
const BRANCH: &str = "main";

fn coords() -> relay_core::namespace::RepoCoordinates {
    relay_core::namespace::parse_repo_coordinates(REPO).unwrap()
}

async fn check_status(harness: &TestHarness, body: Value, user: &str) -> (axum::http::StatusCode, Value) {
    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/check_status")
        .header("content-type", "application/json")
        .header("x-github-user", user)
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let resp = harness.router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn seed_lock(harness: &TestHarness, ns: &str, lock: &Lock) {
    harness
        .state
        .kv
        .hset(&format!("locks:{ns}"), &lock.file_path, &serde_json::to_string(lock).unwrap())
        .await
        .unwrap();
}

fn lock(path: &str, user: &str, now: u64) -> Lock {
    Lock {
        file_path: path.to_string(),
        user_id: user.to_string(),
        user_name: user.to_string(),
        status: LockStatus::Writing,
        agent_head: "head1".to_string(),
        message: "editing".to_string(),
        timestamp: now,
        expiry: now + relay_core::locks::LOCK_TTL_MS,
    }
}

#[tokio::test]
async fn stale_branch_yields_pull_with_warning() {
    let remote = FakeRemoteClient::new().with_head(&coords(), BRANCH, "head2");
    let harness = TestHarness::new(remote);

    let (status, body) = check_status(
        &harness,
        json!({
            "repo_url": REPO,
            "branch": BRANCH,
            "file_paths": ["src/app.ts"],
            "agent_head": "head1",
        }),
        "alice",
    )
    .await;

    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(body["status"], "STALE");
    assert_eq!(body["orchestration"]["action"], "PULL");
    assert_eq!(body["warnings"][0], "STALE_BRANCH: Your branch is behind origin/main");
}

#[tokio::test]
async fn direct_lock_held_by_another_user_switches_task() {
    let remote = FakeRemoteClient::new().with_head(&coords(), BRANCH, "head1");
    let harness = TestHarness::new(remote);
    let now = relay_core::identity::now_ms();
    let ns = namespace_key(&normalize_repo_url(REPO).unwrap(), BRANCH);
    seed_lock(&harness, &ns, &lock("src/app.ts", "bob", now)).await;

    let (status, body) = check_status(
        &harness,
        json!({
            "repo_url": REPO,
            "branch": BRANCH,
            "file_paths": ["src/app.ts"],
            "agent_head": "head1",
        }),
        "alice",
    )
    .await;

    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(body["status"], "CONFLICT");
    assert_eq!(body["orchestration"]["action"], "SWITCH_TASK");
    assert_eq!(body["locks"]["src/app.ts"]["lock_type"], "DIRECT");
}

#[tokio::test]
async fn neighbor_lock_via_cached_graph_edge_is_reported_as_neighbor() {
    let remote = FakeRemoteClient::new()
        .with_head(&coords(), BRANCH, "head1")
        .with_tree(
            "head1",
            vec![
                relay_core::remote::TreeEntry {
                    path: "src/app.ts".into(),
                    sha: "sha-app".into(),
                    size: Some(10),
                    entry_type: relay_core::remote::TreeEntryType::Blob,
                },
                relay_core::remote::TreeEntry {
                    path: "src/auth.ts".into(),
                    sha: "sha-auth".into(),
                    size: Some(10),
                    entry_type: relay_core::remote::TreeEntryType::Blob,
                },
            ],
        )
        .with_blob("head1", "src/app.ts", "import { login } from './auth';")
        .with_blob("head1", "src/auth.ts", "export function login() {}");
    let harness = TestHarness::new(remote);
    let now = relay_core::identity::now_ms();
    let ns = namespace_key(&normalize_repo_url(REPO).unwrap(), BRANCH);

    // Prime the graph cache the way GET /graph would.
    let graph_req = axum::http::Request::builder()
        .method("GET")
        .uri(format!("/graph?repo_url={REPO}&branch={BRANCH}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = harness.router.clone().oneshot(graph_req).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);

    seed_lock(&harness, &ns, &lock("src/auth.ts", "bob", now)).await;

    let (_, body) = check_status(
        &harness,
        json!({
            "repo_url": REPO,
            "branch": BRANCH,
            "file_paths": ["src/app.ts"],
            "agent_head": "head1",
        }),
        "alice",
    )
    .await;

    assert_eq!(body["status"], "CONFLICT");
    assert_eq!(body["locks"]["src/auth.ts"]["lock_type"], "NEIGHBOR");
}

#[tokio::test]
async fn own_lock_is_not_a_conflict() {
    let remote = FakeRemoteClient::new().with_head(&coords(), BRANCH, "head1");
    let harness = TestHarness::new(remote);
    let now = relay_core::identity::now_ms();
    let ns = namespace_key(&normalize_repo_url(REPO).unwrap(), BRANCH);
    seed_lock(&harness, &ns, &lock("src/app.ts", "alice", now)).await;

    let (_, body) = check_status(
        &harness,
        json!({
            "repo_url": REPO,
            "branch": BRANCH,
            "file_paths": ["src/app.ts"],
            "agent_head": "head1",
        }),
        "alice",
    )
    .await;

    assert_eq!(body["status"], "OK");
    assert_eq!(body["orchestration"]["action"], "PROCEED");
}

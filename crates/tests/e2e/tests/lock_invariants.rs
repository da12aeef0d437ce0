//! Lock registry invariants (spec.md §4.6 I1-I4) exercised against a real
//! (if hand-scripted) `acquire`, rather than the unit tests in
//! `relay-core::locks` which seed hash fields directly and never exercise
//! `acquire` at all since `InMemoryKv` can't interpret Lua.

use relay_core::locks::{AcquireOutcome, AcquireRequest, LockRegistry, LockStatus};
use relay_e2e_tests::ScriptedKv;
use std::sync::Arc;

fn registry() -> LockRegistry {
    LockRegistry::new(Arc::new(ScriptedKv::new()))
}

fn req(paths: &[&str], user: &str, now: u64) -> AcquireRequest {
    AcquireRequest {
        namespace_key: "locks:acme/widgets:main".to_string(),
        paths: paths.iter().map(|p| p.to_string()).collect(),
        user_id: user.to_string(),
        user_name: user.to_string(),
        status: LockStatus::Writing,
        agent_head: "head1".to_string(),
        message: "editing".to_string(),
        now,
    }
}

#[tokio::test]
async fn at_most_one_active_lock_holder_per_file() {
    let registry = registry();
    let outcome = registry.acquire(req(&["src/app.ts"], "alice", 1_000)).await.unwrap();
    assert!(matches!(outcome, AcquireOutcome::Success { .. }));

    let outcome = registry.acquire(req(&["src/app.ts"], "bob", 1_000)).await.unwrap();
    match outcome {
        AcquireOutcome::Conflict { conflicting_file, conflicting_user } => {
            assert_eq!(conflicting_file, "src/app.ts");
            assert_eq!(conflicting_user, "alice");
        }
        AcquireOutcome::Success { .. } => panic!("expected conflict"),
    }
}

#[tokio::test]
async fn failed_multi_file_acquire_leaves_every_path_untouched() {
    let registry = registry();
    registry.acquire(req(&["src/b.ts"], "bob", 1_000)).await.unwrap();

    let outcome = registry.acquire(req(&["src/a.ts", "src/b.ts", "src/c.ts"], "alice", 1_000)).await.unwrap();
    assert!(matches!(outcome, AcquireOutcome::Conflict { .. }));

    let active = registry.list("locks:acme/widgets:main", 1_000).await.unwrap();
    assert!(!active.contains_key("src/a.ts"));
    assert!(!active.contains_key("src/c.ts"));
    assert_eq!(active["src/b.ts"].user_id, "bob");
}

#[tokio::test]
async fn release_only_affects_the_caller_own_locks() {
    let registry = registry();
    registry.acquire(req(&["src/a.ts"], "alice", 1_000)).await.unwrap();
    registry.acquire(req(&["src/b.ts"], "bob", 1_000)).await.unwrap();

    registry
        .release("locks:acme/widgets:main", &["src/a.ts".to_string(), "src/b.ts".to_string()], "alice")
        .await
        .unwrap();

    let active = registry.list("locks:acme/widgets:main", 1_000).await.unwrap();
    assert!(!active.contains_key("src/a.ts"));
    assert!(active.contains_key("src/b.ts"));
}

#[tokio::test]
async fn cleanup_expired_is_a_no_op_when_nothing_has_expired() {
    let registry = registry();
    registry.acquire(req(&["src/a.ts"], "alice", 1_000)).await.unwrap();

    let removed = registry.cleanup_expired("locks:acme/widgets:main", 1_000).await.unwrap();
    assert_eq!(removed, 0);
}

#[tokio::test]
async fn lock_exactly_at_expiry_is_invisible_and_non_blocking() {
    let registry = registry();
    registry.acquire(req(&["src/a.ts"], "alice", 0)).await.unwrap();

    let active = registry.list("locks:acme/widgets:main", relay_core::locks::LOCK_TTL_MS).await.unwrap();
    assert!(!active.contains_key("src/a.ts"));

    let outcome = registry.acquire(req(&["src/a.ts"], "bob", relay_core::locks::LOCK_TTL_MS)).await.unwrap();
    assert!(matches!(outcome, AcquireOutcome::Success { .. }));
}

#[tokio::test]
async fn duplicate_paths_in_one_request_are_treated_as_a_single_path() {
    let registry = registry();
    let outcome = registry.acquire(req(&["src/a.ts", "src/a.ts"], "alice", 1_000)).await.unwrap();
    match outcome {
        AcquireOutcome::Success { locks } => assert_eq!(locks.len(), 1),
        AcquireOutcome::Conflict { .. } => panic!("unexpected conflict"),
    }
}

#[tokio::test]
async fn release_all_reports_the_count_cleared() {
    let registry = registry();
    registry.acquire(req(&["src/a.ts", "src/b.ts"], "alice", 1_000)).await.unwrap();

    let released = registry.release_all("locks:acme/widgets:main").await.unwrap();
    assert_eq!(released, 2);

    let active = registry.list("locks:acme/widgets:main", 1_000).await.unwrap();
    assert!(active.is_empty());
}

#[tokio::test]
async fn empty_tree_graph_build_is_an_empty_graph_at_the_current_head() {
    use relay_core::graph::GraphStore;
    use relay_e2e_tests::FakeRemoteClient;

    let kv = Arc::new(ScriptedKv::new());
    let coords = relay_core::namespace::parse_repo_coordinates("https://github.com/acme/empty").unwrap();
    let remote: Arc<dyn relay_core::remote::RemoteRepoClient> =
        Arc::new(FakeRemoteClient::new().with_head(&coords, "main", "head1").with_tree("head1", vec![]));
    let locks = Arc::new(LockRegistry::new(kv.clone()));
    let graph_store = GraphStore::new(kv, remote, locks);

    let (graph, active_locks) = graph_store
        .generate("acme/empty:main", "locks:acme/empty:main", &coords, "main", false, 1_000)
        .await
        .unwrap();

    assert!(graph.nodes.is_empty());
    assert!(graph.edges.is_empty());
    assert_eq!(graph.version, "head1");
    assert!(active_locks.is_empty());
}

#[tokio::test]
async fn activity_feed_drops_the_oldest_entry_past_its_cap() {
    use relay_core::activity::{ActivityEvent, ActivityLog, ActivityStatus, MAX_READ_LIMIT, MAX_RETAINED};

    let kv = Arc::new(ScriptedKv::new());
    let log = ActivityLog::new(kv);
    let ns = "acme/widgets:main";
    let cap = MAX_RETAINED as usize;

    let event = |i: usize| ActivityEvent {
        id: ActivityEvent::new_id(i as u64, "alice", ActivityStatus::Writing, "src/a.ts", 0),
        file_path: "src/a.ts".to_string(),
        user_id: "alice".to_string(),
        user_name: "alice".to_string(),
        status: ActivityStatus::Writing,
        message: format!("edit {i}"),
        timestamp: i as u64,
    };

    for i in 0..cap {
        log.push(ns, &[event(i)]).await.unwrap();
    }

    // Oldest-first: index 0 is "edit 0" (the very first push), the last is "edit {cap-1}".
    let before = log.read(ns, MAX_READ_LIMIT).await.unwrap();
    assert_eq!(before.len(), cap);
    assert_eq!(before.first().unwrap().message, "edit 0");
    assert_eq!(before.last().unwrap().message, format!("edit {}", cap - 1));

    log.push(ns, &[event(cap)]).await.unwrap();

    let after = log.read(ns, MAX_READ_LIMIT).await.unwrap();
    assert_eq!(after.len(), cap);
    assert!(after.iter().all(|e| e.message != "edit 0"));
    assert_eq!(after.last().unwrap().message, format!("edit {cap}"));
}

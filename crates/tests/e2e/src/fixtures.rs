//! Test doubles and harness assembly.
//!
//! `FakeRemoteClient` fills the same role for [`relay_core::remote::RemoteRepoClient`]
//! that `relay_core::kv::InMemoryKv` fills for `KvStore`: a programmable,
//! in-process stand-in so tests don't depend on network access to a real
//! repository host.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use relay_core::activity::ActivityLog;
use relay_core::error::{Error as CoreError, Result as CoreResult};
use relay_core::graph::GraphStore;
use relay_core::kv::{InMemoryKv, KvStore};
use relay_core::locks::LockRegistry;
use relay_core::namespace::RepoCoordinates;
use relay_core::remote::{RemoteRepoClient, TreeEntry};
use relay_common::config::{CronConfig, KvConfig, RelayConfig, RemoteConfig, RequestConfig, ServerConfig};
use relay_server::AppState;
use serde::Serialize;

use crate::TestConfig;

/// A [`KvStore`] that delegates every primitive to `InMemoryKv` but gives
/// `eval_script` a real implementation of the acquire-lock semantics
/// described by `relay_core::locks`' `ACQUIRE_SCRIPT` doc comment, since
/// `InMemoryKv` itself refuses to interpret Lua. `relay-core` only ever
/// evaluates that one script, so this double doesn't need to parse `script`
/// at all — just replicate its documented argument shape and behavior.
pub struct ScriptedKv {
    inner: InMemoryKv,
}

impl Default for ScriptedKv {
    fn default() -> Self {
        Self { inner: InMemoryKv::new() }
    }
}

impl ScriptedKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Serialize)]
struct ScriptLockRecord<'a> {
    file_path: &'a str,
    user_id: &'a str,
    user_name: &'a str,
    status: &'a str,
    agent_head: &'a str,
    message: &'a str,
    timestamp: u64,
    expiry: u64,
}

#[async_trait]
impl KvStore for ScriptedKv {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        self.inner.set(key, value).await
    }
    async fn del(&self, key: &str) -> CoreResult<()> {
        self.inner.del(key).await
    }
    async fn hget(&self, key: &str, field: &str) -> CoreResult<Option<String>> {
        self.inner.hget(key, field).await
    }
    async fn hset(&self, key: &str, field: &str, value: &str) -> CoreResult<()> {
        self.inner.hset(key, field, value).await
    }
    async fn hdel(&self, key: &str, fields: &[String]) -> CoreResult<u64> {
        self.inner.hdel(key, fields).await
    }
    async fn hgetall(&self, key: &str) -> CoreResult<HashMap<String, String>> {
        self.inner.hgetall(key).await
    }
    async fn lpush(&self, key: &str, value: &str) -> CoreResult<()> {
        self.inner.lpush(key, value).await
    }
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> CoreResult<()> {
        self.inner.ltrim(key, start, stop).await
    }
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> CoreResult<Vec<String>> {
        self.inner.lrange(key, start, stop).await
    }
    async fn llen(&self, key: &str) -> CoreResult<u64> {
        self.inner.llen(key).await
    }

    /// `keys = [namespace_key]`, `args = [now, ttl_ms, user_id, user_name,
    /// status, agent_head, message, path...]` — see `ACQUIRE_SCRIPT`.
    async fn eval_script(&self, _script: &str, keys: &[String], args: &[String]) -> CoreResult<String> {
        let namespace_key = keys.first().ok_or_else(|| CoreError::internal("eval_script: missing namespace key"))?;
        let now: u64 = args[0].parse().map_err(|_| CoreError::internal("eval_script: bad now"))?;
        let ttl: u64 = args[1].parse().map_err(|_| CoreError::internal("eval_script: bad ttl"))?;
        let user_id = &args[2];
        let user_name = &args[3];
        let status = &args[4];
        let agent_head = &args[5];
        let message = &args[6];
        let paths = &args[7..];

        let existing = self.inner.hgetall(namespace_key).await?;

        for path in paths {
            if let Some(raw) = existing.get(path) {
                let lock: relay_core::locks::Lock = serde_json::from_str(raw)?;
                if now < lock.expiry && lock.user_id != *user_id {
                    return Ok(serde_json::json!({"ok": false, "file": path, "user": lock.user_id}).to_string());
                }
            }
        }

        let mut written = Vec::new();
        for path in paths {
            let record = ScriptLockRecord {
                file_path: path,
                user_id,
                user_name,
                status,
                agent_head,
                message,
                timestamp: now,
                expiry: now + ttl,
            };
            self.inner.hset(namespace_key, path, &serde_json::to_string(&record)?).await?;
            written.push(record);
        }

        Ok(serde_json::json!({"ok": true, "locks": written}).to_string())
    }

    async fn scan_keys(&self, pattern: &str) -> CoreResult<Vec<String>> {
        self.inner.scan_keys(pattern).await
    }
}

fn branch_key(coords: &RepoCoordinates, branch: &str) -> String {
    format!("{}/{}/{}@{}", coords.host, coords.owner, coords.repo, branch)
}

/// A scriptable [`RemoteRepoClient`]. Branches not registered via
/// [`FakeRemoteClient::with_head`] resolve as [`CoreError::BranchNotFound`],
/// matching a real host's behavior for an unknown ref.
#[derive(Default)]
pub struct FakeRemoteClient {
    heads: Mutex<HashMap<String, String>>,
    trees: Mutex<HashMap<String, Vec<TreeEntry>>>,
    blobs: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl FakeRemoteClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sha` as the current head of `branch`.
    pub fn with_head(self, coords: &RepoCoordinates, branch: &str, sha: &str) -> Self {
        self.heads.lock().unwrap_or_else(|e| e.into_inner()).insert(branch_key(coords, branch), sha.to_string());
        self
    }

    /// Registers the recursive tree returned for `commit_sha`.
    pub fn with_tree(self, commit_sha: &str, entries: Vec<TreeEntry>) -> Self {
        self.trees.lock().unwrap_or_else(|e| e.into_inner()).insert(commit_sha.to_string(), entries);
        self
    }

    /// Registers blob content for `(commit_sha, path)`.
    pub fn with_blob(self, commit_sha: &str, path: &str, content: &str) -> Self {
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((commit_sha.to_string(), path.to_string()), content.as_bytes().to_vec());
        self
    }
}

#[async_trait]
impl RemoteRepoClient for FakeRemoteClient {
    async fn get_branch_head(&self, coords: &RepoCoordinates, branch: &str) -> CoreResult<String> {
        self.heads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&branch_key(coords, branch))
            .cloned()
            .ok_or_else(|| CoreError::BranchNotFound(branch.to_string()))
    }

    async fn get_recursive_tree(&self, _coords: &RepoCoordinates, commit_sha: &str) -> CoreResult<Vec<TreeEntry>> {
        Ok(self.trees.lock().unwrap_or_else(|e| e.into_inner()).get(commit_sha).cloned().unwrap_or_default())
    }

    async fn get_blob_content(&self, _coords: &RepoCoordinates, path: &str, commit_sha: &str) -> CoreResult<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(commit_sha.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| CoreError::internal(format!("no blob registered for {path}@{commit_sha}")))
    }
}

/// A fully-assembled router plus direct handles to its components, for tests
/// that need to seed state (e.g. pre-populate a lock) before driving a
/// request through the router.
pub struct TestHarness {
    pub router: axum::Router,
    pub state: AppState,
    pub cron_secret: String,
}

impl TestHarness {
    /// Builds a harness against `InMemoryKv` and the given remote client.
    pub fn new(remote: FakeRemoteClient) -> Self {
        let test_config = TestConfig::new();

        let config = Arc::new(RelayConfig {
            server: ServerConfig { host: "0.0.0.0".into(), port: 0, log_format_json: false, canonical_repo_url: None },
            kv: KvConfig { url: String::new(), token: None },
            remote: RemoteConfig { token: None },
            cron: CronConfig { secret: test_config.cron_secret.clone() },
            request: RequestConfig { deadline_ms: 5_000, graph_build_deadline_ms: 30_000 },
        });

        let kv: Arc<dyn KvStore> = Arc::new(ScriptedKv::new());
        let remote: Arc<dyn RemoteRepoClient> = Arc::new(remote);
        let locks = Arc::new(LockRegistry::new(kv.clone()));
        let graph = Arc::new(GraphStore::new(kv.clone(), remote.clone(), locks.clone()));
        let activity = Arc::new(ActivityLog::new(kv.clone()));

        let state = AppState {
            config,
            kv,
            remote,
            locks,
            graph,
            activity,
            metrics_handle: build_metrics_handle(),
            start_time: std::time::Instant::now(),
            ratelimit_config: disabled_rate_limit(),
        };

        let router = relay_server::build_router(state.clone());
        Self { router, state, cron_secret: test_config.cron_secret }
    }
}

fn build_metrics_handle() -> metrics_exporter_prometheus::PrometheusHandle {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .build_recorder()
        .handle()
}

/// Disabled outright rather than via `RateLimitConfig::new()`'s env vars, so
/// scenario assertions aren't at the mercy of request ordering or timing.
fn disabled_rate_limit() -> relay_server::ratelimit::RateLimitConfig {
    use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DashMapStateStore};
    let limiter: RateLimiter<String, DashMapStateStore<String>, DefaultClock> =
        RateLimiter::keyed(Quota::per_second(std::num::NonZeroU32::MIN));
    relay_server::ratelimit::RateLimitConfig { limiter: Arc::new(limiter), enabled: false }
}

//! KV Store Abstraction (C5, spec.md §4.5).
//!
//! Required capabilities: scalar get/set/del, hash ops, list ops, and atomic
//! script evaluation over a set of keys — the lock registry (C6) and the
//! cleanup job depend on true multi-key atomicity, not merely a pipeline.
//! `RedisKv` is the production implementation; `InMemoryKv` is a test double
//! used by relay-core's own unit tests (see [`crate::locks`]).

use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Abstraction over the primitives the coordination core needs from a
/// key-value store. Implementations must provide true atomicity for
/// [`KvStore::eval_script`] — a non-transactional pipeline is not sufficient
/// to uphold the lock registry's I1/I4 invariants.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn lpush(&self, key: &str, value: &str) -> Result<()>;
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<()>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;
    async fn llen(&self, key: &str) -> Result<u64>;

    /// Evaluates a Lua script against `keys` with `args`, returning its raw
    /// JSON-decodable result. This is the only path through which C6's
    /// `acquire` mutates lock state — it must run as a single atomic unit.
    async fn eval_script(&self, script: &str, keys: &[String], args: &[String]) -> Result<String>;

    /// Lists all keys matching `pattern` (glob-style, as Redis `KEYS` takes).
    /// Used by the cleanup job to enumerate lock namespaces.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Redis-backed [`KvStore`] using a `ConnectionManager` for automatic
/// reconnection, matching the teacher's preference for a managed async
/// connection over a raw multiplexed one.
pub struct RedisKv {
    conn: Mutex<ConnectionManager>,
}

impl RedisKv {
    /// Connects to `url`, AUTH-ing with `token` first when one is configured
    /// (`KV_TOKEN`, spec.md §6.10).
    pub async fn connect(url: &str, token: Option<&str>) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::LockStoreUnavailable(e.to_string()))?;
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::LockStoreUnavailable(e.to_string()))?;

        if let Some(token) = token {
            redis::cmd("AUTH")
                .arg(token)
                .query_async::<()>(&mut conn)
                .await
                .map_err(kv_err)?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn kv_err(e: redis::RedisError) -> Error {
    Error::LockStoreUnavailable(e.to_string())
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.lock().await;
        conn.get(key).await.map_err(kv_err)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.set::<_, _, ()>(key, value).await.map_err(kv_err)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.del::<_, ()>(key).await.map_err(kv_err)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.lock().await;
        conn.hget(key, field).await.map_err(kv_err)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.hset::<_, _, _, ()>(key, field, value).await.map_err(kv_err)
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock().await;
        conn.hdel(key, fields).await.map_err(kv_err)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.lock().await;
        conn.hgetall(key).await.map_err(kv_err)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.lpush::<_, _, ()>(key, value).await.map_err(kv_err)
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.ltrim::<_, ()>(key, start, stop).await.map_err(kv_err)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().await;
        conn.lrange(key, start, stop).await.map_err(kv_err)
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.lock().await;
        conn.llen(key).await.map_err(kv_err)
    }

    async fn eval_script(&self, script: &str, keys: &[String], args: &[String]) -> Result<String> {
        let mut invocation = Script::new(script).prepare_invoke();
        for k in keys {
            invocation.key(k);
        }
        for a in args {
            invocation.arg(a);
        }
        let mut conn = self.conn.lock().await;
        invocation
            .invoke_async::<String>(&mut *conn)
            .await
            .map_err(kv_err)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().await;
        conn.keys(pattern).await.map_err(kv_err)
    }
}

/// In-process test double for [`KvStore`]. Implements the same atomicity
/// contract trivially via a single mutex, since there is nothing concurrent
/// to race against within one process's test run.
#[derive(Default)]
pub struct InMemoryKv {
    strings: Arc<Mutex<HashMap<String, String>>>,
    hashes: Arc<Mutex<HashMap<String, HashMap<String, String>>>>,
    lists: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.strings.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.strings
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.strings.lock().await.remove(key);
        self.hashes.lock().await.remove(key);
        self.lists.lock().await.remove(key);
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .hashes
            .lock()
            .await
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hashes
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        let mut hashes = self.hashes.lock().await;
        let Some(h) = hashes.get_mut(key) else {
            return Ok(0);
        };
        let mut removed = 0u64;
        for f in fields {
            if h.remove(f).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.hashes.lock().await.get(key).cloned().unwrap_or_default())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        self.lists
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(0, value.to_string());
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        let mut lists = self.lists.lock().await;
        if let Some(list) = lists.get_mut(key) {
            let len = list.len() as isize;
            let (s, e) = normalize_range(start, stop, len);
            *list = if s <= e {
                list[s as usize..=e as usize].to_vec()
            } else {
                Vec::new()
            };
        }
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let lists = self.lists.lock().await;
        let Some(list) = lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let (s, e) = normalize_range(start, stop, len);
        if s > e || list.is_empty() {
            return Ok(Vec::new());
        }
        Ok(list[s as usize..=e as usize].to_vec())
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        Ok(self.lists.lock().await.get(key).map(|l| l.len()).unwrap_or(0) as u64)
    }

    async fn eval_script(&self, _script: &str, _keys: &[String], _args: &[String]) -> Result<String> {
        Err(Error::internal(
            "InMemoryKv does not interpret Lua scripts; exercise lock logic directly against its hash/list primitives in tests",
        ))
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        // Only supports the trailing-`*` glob shape the cleanup job uses.
        let prefix = pattern.trim_end_matches('*');
        let strings = self.strings.lock().await;
        let hashes = self.hashes.lock().await;
        let mut keys: Vec<String> = strings
            .keys()
            .chain(hashes.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

fn normalize_range(start: isize, stop: isize, len: isize) -> (isize, isize) {
    if len == 0 {
        return (0, -1);
    }
    let norm = |i: isize| -> isize {
        if i < 0 { (len + i).max(0) } else { i.min(len - 1) }
    };
    (norm(start), norm(stop))
}

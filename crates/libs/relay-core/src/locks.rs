//! Lock Registry (C6, spec.md §4.6).
//!
//! Namespace key `locks:<normalizedRepoURL>:<branch>` is a hash whose field
//! is `filePath` and whose value is a serialized [`Lock`]. `acquire` is the
//! one operation that must be atomic across every requested path — it runs
//! as a single Lua script via [`crate::kv::KvStore::eval_script`] so I1/I4
//! hold regardless of concurrent callers.
//!
//! Ported from the teacher's `file_reservation.rs` BMC controller: same
//! TTL/expiry shape and doc-comment density, logic moved from SQL rows
//! guarded by a transaction to hash fields guarded by a Lua script.

use crate::error::{Error, Result};
use crate::kv::KvStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Active for five minutes from the moment it's (re-)acquired.
pub const LOCK_TTL_MS: u64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LockStatus {
    Reading,
    Writing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub file_path: String,
    pub user_id: String,
    pub user_name: String,
    pub status: LockStatus,
    pub agent_head: String,
    pub message: String,
    pub timestamp: u64,
    pub expiry: u64,
}

impl Lock {
    pub fn is_active(&self, now: u64) -> bool {
        now < self.expiry
    }
}

/// Input to [`LockRegistry::acquire`].
pub struct AcquireRequest {
    pub namespace_key: String,
    pub paths: Vec<String>,
    pub user_id: String,
    pub user_name: String,
    pub status: LockStatus,
    pub agent_head: String,
    pub message: String,
    pub now: u64,
}

/// Outcome of an `acquire` call. Conflict is a normal business outcome, never
/// an error (spec.md §4.6 "Failure semantics").
pub enum AcquireOutcome {
    Success { locks: Vec<Lock> },
    Conflict { conflicting_file: String, conflicting_user: String },
}

pub struct LockRegistry {
    kv: Arc<dyn KvStore>,
}

/// Lua script implementing the all-or-nothing acquire described in
/// spec.md §4.6. `KEYS[1]` is the namespace hash key; `ARGV` is
/// `[now, ttl_ms, user_id, user_name, status, agent_head, message, path...]`.
/// Returns a JSON string: either `{"ok":true,"locks":[...]}` or
/// `{"ok":false,"file":"...","user":"..."}`.
const ACQUIRE_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])
local user_id = ARGV[3]
local user_name = ARGV[4]
local status = ARGV[5]
local agent_head = ARGV[6]
local message = ARGV[7]

local paths = {}
for i = 8, #ARGV do
  paths[#paths + 1] = ARGV[i]
end

for _, path in ipairs(paths) do
  local raw = redis.call('HGET', key, path)
  if raw then
    local existing = cjson.decode(raw)
    if now < existing.expiry and existing.user_id ~= user_id then
      return cjson.encode({ok = false, file = path, user = existing.user_id})
    end
  end
end

local written = {}
for _, path in ipairs(paths) do
  local record = {
    file_path = path,
    user_id = user_id,
    user_name = user_name,
    status = status,
    agent_head = agent_head,
    message = message,
    timestamp = now,
    expiry = now + ttl,
  }
  redis.call('HSET', key, path, cjson.encode(record))
  written[#written + 1] = record
end

return cjson.encode({ok = true, locks = written})
"#;

#[derive(Deserialize)]
#[serde(untagged)]
enum AcquireScriptResult {
    Success { #[allow(dead_code)] ok: bool, locks: Vec<Lock> },
    Conflict { #[allow(dead_code)] ok: bool, file: String, user: String },
}

impl LockRegistry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Atomically acquires every path in `req.paths` for the caller, or
    /// fails the whole request on the first conflicting path (I1/I4).
    pub async fn acquire(&self, req: AcquireRequest) -> Result<AcquireOutcome> {
        let mut dedup_paths: Vec<String> = Vec::new();
        for p in &req.paths {
            if !dedup_paths.contains(p) {
                dedup_paths.push(p.clone());
            }
        }

        let status_str = match req.status {
            LockStatus::Reading => "READING",
            LockStatus::Writing => "WRITING",
        };

        let mut args = vec![
            req.now.to_string(),
            LOCK_TTL_MS.to_string(),
            req.user_id.clone(),
            req.user_name.clone(),
            status_str.to_string(),
            req.agent_head.clone(),
            req.message.clone(),
        ];
        args.extend(dedup_paths);

        let raw = self
            .kv
            .eval_script(ACQUIRE_SCRIPT, &[req.namespace_key], &args)
            .await?;

        let parsed: AcquireScriptResult = serde_json::from_str(&raw)?;
        Ok(match parsed {
            AcquireScriptResult::Success { locks, .. } => {
                metrics::counter!("relay_lock_acquire_total", "outcome" => "success").increment(1);
                AcquireOutcome::Success { locks }
            }
            AcquireScriptResult::Conflict { file, user, .. } => {
                metrics::counter!("relay_lock_acquire_total", "outcome" => "conflict").increment(1);
                AcquireOutcome::Conflict {
                    conflicting_file: file,
                    conflicting_user: user,
                }
            }
        })
    }

    /// Deletes only the fields owned by `user_id`. Non-matching fields are
    /// silently left alone.
    pub async fn release(&self, namespace_key: &str, paths: &[String], user_id: &str) -> Result<()> {
        for path in paths {
            if let Some(raw) = self.kv.hget(namespace_key, path).await? {
                let lock: Lock = serde_json::from_str(&raw)?;
                if lock.user_id == user_id {
                    self.kv.hdel(namespace_key, &[path.clone()]).await?;
                }
            }
        }
        Ok(())
    }

    /// Clears the entire namespace, returning the number of locks that were
    /// active (not necessarily non-expired) at the time of clearing.
    pub async fn release_all(&self, namespace_key: &str) -> Result<u64> {
        let all = self.kv.hgetall(namespace_key).await?;
        let count = all.len() as u64;
        self.kv.del(namespace_key).await?;
        Ok(count)
    }

    /// Returns all non-expired locks, keyed by file path. Opportunistically
    /// prunes expired fields it encounters (I2).
    pub async fn list(&self, namespace_key: &str, now: u64) -> Result<HashMap<String, Lock>> {
        let raw = self.kv.hgetall(namespace_key).await?;
        let mut active = HashMap::new();
        let mut expired_fields = Vec::new();

        for (path, value) in raw {
            match serde_json::from_str::<Lock>(&value) {
                Ok(lock) if lock.is_active(now) => {
                    active.insert(path, lock);
                }
                Ok(_) => expired_fields.push(path),
                Err(_) => expired_fields.push(path),
            }
        }

        if !expired_fields.is_empty() {
            self.kv.hdel(namespace_key, &expired_fields).await?;
        }

        Ok(active)
    }

    /// Removes expired fields; safe to run concurrently with any other
    /// lock-registry operation. Returns the number removed.
    pub async fn cleanup_expired(&self, namespace_key: &str, now: u64) -> Result<u64> {
        let raw = self.kv.hgetall(namespace_key).await?;
        let expired: Vec<String> = raw
            .into_iter()
            .filter_map(|(path, value)| match serde_json::from_str::<Lock>(&value) {
                Ok(lock) if !lock.is_active(now) => Some(path),
                Err(_) => Some(path),
                _ => None,
            })
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }
        self.kv.hdel(namespace_key, &expired).await
    }
}

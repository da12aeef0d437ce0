//! Activity Log (C9, spec.md §4.9).
//!
//! A bounded, newest-first list of status transitions per namespace. Writes
//! push one event per affected file and trim to 500; reads return the newest
//! N (default 120) and let the caller decide display order.

use crate::error::Result;
use crate::kv::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MAX_RETAINED: isize = 500;
pub const DEFAULT_READ_LIMIT: usize = 120;
pub const MAX_READ_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivityStatus {
    Open,
    Reading,
    Writing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: String,
    pub file_path: String,
    pub user_id: String,
    pub user_name: String,
    pub status: ActivityStatus,
    pub message: String,
    pub timestamp: u64,
}

impl ActivityEvent {
    /// A stable id synthesized from timestamp, user, status, path, and an
    /// index to disambiguate events pushed within the same request.
    pub fn new_id(timestamp: u64, user_id: &str, status: ActivityStatus, path: &str, index: usize) -> String {
        format!("{timestamp}-{user_id}-{status:?}-{path}-{index}")
    }
}

pub struct ActivityLog {
    kv: Arc<dyn KvStore>,
}

fn activity_key(ns: &str) -> String {
    format!("activity:{ns}")
}

impl ActivityLog {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Pushes `events` to the head of the namespace's list and trims to
    /// [`MAX_RETAINED`].
    pub async fn push(&self, ns: &str, events: &[ActivityEvent]) -> Result<()> {
        let key = activity_key(ns);
        for event in events {
            self.kv.lpush(&key, &serde_json::to_string(event)?).await?;
        }
        self.kv.ltrim(&key, 0, MAX_RETAINED - 1).await?;
        Ok(())
    }

    /// Returns the newest `limit` events, oldest-first (reversed from
    /// storage order, for UI consumers per spec.md §4.9).
    pub async fn read(&self, ns: &str, limit: usize) -> Result<Vec<ActivityEvent>> {
        let limit = limit.clamp(1, MAX_READ_LIMIT);
        let raw = self.kv.lrange(&activity_key(ns), 0, limit as isize - 1).await?;
        let mut events: Vec<ActivityEvent> = raw
            .iter()
            .filter_map(|r| serde_json::from_str(r).ok())
            .collect();
        events.reverse();
        Ok(events)
    }

    /// Atomically clears the namespace's feed, returning its prior length.
    pub async fn clear(&self, ns: &str) -> Result<u64> {
        let key = activity_key(ns);
        let len = self.kv.llen(&key).await?;
        self.kv.del(&key).await?;
        Ok(len)
    }
}

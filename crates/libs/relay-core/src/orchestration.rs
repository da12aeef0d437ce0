//! Orchestration Engine (C8, spec.md §4.8).
//!
//! A pure function from the caller's and remote's state to a single
//! actionable verdict. No I/O, no KV access — `relay-server`'s handlers
//! gather the inputs (identity, heads, lock snapshot) and hand them here.

use crate::locks::Lock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Proceed,
    Pull,
    Push,
    Wait,
    SwitchTask,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationCommand {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub action: Action,
    pub command: Option<String>,
    pub reason: String,
}

impl OrchestrationCommand {
    fn new(action: Action, command: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            kind: "orchestration_command",
            action,
            command: command.map(str::to_string),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockKind {
    Direct,
    Neighbor,
}

/// A lock with its overlay classification relative to the caller's request.
#[derive(Debug, Clone)]
pub struct ClassifiedLock<'a> {
    pub path: &'a str,
    pub lock: &'a Lock,
    pub kind: LockKind,
}

/// Classifies every lock in `direct_paths ∪ neighbor of direct_paths` against
/// the caller, per spec.md §4.8 "Lock type overlay" (direct wins on overlap).
pub fn classify_locks<'a>(
    locks: &'a HashMap<String, Lock>,
    direct_paths: &[String],
    neighbors: impl Fn(&str) -> std::collections::HashSet<String>,
) -> Vec<ClassifiedLock<'a>> {
    let direct_set: std::collections::HashSet<&str> = direct_paths.iter().map(String::as_str).collect();
    let mut neighbor_set: std::collections::HashSet<String> = std::collections::HashSet::new();
    for p in direct_paths {
        neighbor_set.extend(neighbors(p));
    }

    locks
        .iter()
        .filter_map(|(path, lock)| {
            if direct_set.contains(path.as_str()) {
                Some(ClassifiedLock { path, lock, kind: LockKind::Direct })
            } else if neighbor_set.contains(path) {
                Some(ClassifiedLock { path, lock, kind: LockKind::Neighbor })
            } else {
                None
            }
        })
        .collect()
}

/// Decides the `check_status` verdict (spec.md §4.8 rules 1–3).
pub fn decide_check_status(
    caller_id: &str,
    agent_head: &str,
    remote_head: &str,
    classified: &[ClassifiedLock<'_>],
) -> OrchestrationCommand {
    if agent_head != remote_head {
        return OrchestrationCommand::new(
            Action::Pull,
            Some("git pull --rebase"),
            format!("Your branch is behind origin (remote head {remote_head})"),
        );
    }

    if let Some(conflict) = classified.iter().find(|c| c.lock.user_id != caller_id) {
        let kind = match conflict.kind {
            LockKind::Direct => "DIRECT",
            LockKind::Neighbor => "NEIGHBOR",
        };
        return OrchestrationCommand::new(
            Action::SwitchTask,
            None,
            format!(
                "{kind} lock on {} is held by {}",
                conflict.path, conflict.lock.user_id
            ),
        );
    }

    OrchestrationCommand::new(Action::Proceed, None, "No conflicts; working tree is current")
}

/// Top-level `status` field for `check_status` responses: `STALE > CONFLICT > OK`.
pub fn check_status_label(agent_head: &str, remote_head: &str, classified: &[ClassifiedLock<'_>], caller_id: &str) -> &'static str {
    if agent_head != remote_head {
        return "STALE";
    }
    if classified.iter().any(|c| c.lock.user_id != caller_id) {
        return "CONFLICT";
    }
    "OK"
}

/// Decides the `post_status` verdict for `WRITING`/`READING` when the
/// request is otherwise well-formed (non-stale-head cases handled by the
/// caller per spec.md §4.8).
pub fn decide_post_status_acquire_conflict(conflicting_file: &str, conflicting_user: &str) -> OrchestrationCommand {
    OrchestrationCommand::new(
        Action::SwitchTask,
        None,
        format!("FILE_CONFLICT: {conflicting_file} is held by {conflicting_user}"),
    )
}

pub fn decide_post_status_stale() -> OrchestrationCommand {
    OrchestrationCommand::new(
        Action::Pull,
        Some("git pull --rebase"),
        "Your agent_head does not match the remote head",
    )
}

pub fn decide_post_status_acquire_success() -> OrchestrationCommand {
    OrchestrationCommand::new(Action::Proceed, None, "Lock(s) acquired")
}

pub fn decide_post_status_open_push_needed() -> OrchestrationCommand {
    OrchestrationCommand::new(
        Action::Push,
        Some("git push"),
        "You haven't advanced the repo yet",
    )
}

pub fn decide_post_status_open_release_success() -> OrchestrationCommand {
    OrchestrationCommand::new(Action::Proceed, None, "Lock(s) released")
}

pub fn decide_post_status_open_release_failure(detail: impl Into<String>) -> OrchestrationCommand {
    OrchestrationCommand::new(Action::Stop, None, detail.into())
}

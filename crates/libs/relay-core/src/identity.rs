//! Clock & Identity (C1, spec.md §4.1).
//!
//! Monotonic wall time and caller identity extraction from request headers.
//! Adapted from the teacher's `Ctx`-based request-context pattern: instead of
//! resolving identity against a database row, Relay resolves it statelessly
//! from two headers with a permissive fallback.

use crate::error::{Error, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. The sole time source used throughout
/// relay-core — never `Instant`, since locks and activity events need
/// wall-clock timestamps that survive process restarts.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A caller's resolved identity: a stable id used for lock ownership, and a
/// display name shown to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub user_name: String,
}

impl Identity {
    pub const ANONYMOUS: &'static str = "anonymous";

    /// Resolves identity from `x-github-user` (preferred for `user_id`) and
    /// `x-github-username` (preferred for `user_name`), falling back to
    /// `"anonymous"` for whichever is missing.
    ///
    /// When `strict` is set, an entirely empty pair fails with
    /// [`Error::IdentityUnresolved`] instead of falling back — spec.md §4.1
    /// notes this only applies to write paths, and strict mode defaults off.
    pub fn resolve(github_user: Option<&str>, github_username: Option<&str>, strict: bool) -> Result<Self> {
        let user = non_empty(github_user);
        let username = non_empty(github_username);

        if strict && user.is_none() && username.is_none() {
            return Err(Error::IdentityUnresolved);
        }

        let user_id = user
            .or(username)
            .unwrap_or(Self::ANONYMOUS)
            .to_string();
        let user_name = username
            .or(user)
            .unwrap_or(Self::ANONYMOUS)
            .to_string();

        Ok(Identity { user_id, user_name })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

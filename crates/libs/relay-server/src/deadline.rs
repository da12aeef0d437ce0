//! Per-request deadline enforcement (spec.md §5 "Suspension").
//!
//! Every operation that touches C2 (remote host) or C5 (KV store) is a
//! potential suspension point; handlers wrap that work in a deadline so a
//! slow remote host or KV store fails the request instead of hanging it.
//! A timeout surfaces as [`relay_core::Error::Unreachable`] — indistinguishable
//! to the caller from the remote host actually being unreachable, which is
//! the accurate description either way.

use relay_core::error::{Error as CoreError, Result as CoreResult};
use std::future::Future;
use std::time::Duration;

/// Runs `fut` to completion or fails with `Error::Unreachable` once `ms`
/// elapses. The remote host client itself doesn't honor cancellation
/// mid-request (octocrab has no deadline knob), so this bounds wall-clock
/// time for the handler rather than aborting the in-flight HTTP call.
pub async fn with_deadline<T>(ms: u64, fut: impl Future<Output = CoreResult<T>>) -> CoreResult<T> {
    match tokio::time::timeout(Duration::from_millis(ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::Unreachable(format!(
            "request exceeded its {ms}ms deadline"
        ))),
    }
}

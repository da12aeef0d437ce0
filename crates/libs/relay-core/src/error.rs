//! Error types for relay-core operations.
//!
//! `FILE_CONFLICT` is deliberately absent from this enum: a lock clash is a
//! normal business outcome reported in a response body (spec.md §7), not a
//! failure of the lock registry itself.

use thiserror::Error;

/// The error type for relay-core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Request payload failed validation (missing field, malformed path, …).
    #[error("Validation error: {0}")]
    Validation(String),

    /// No usable agent/human identity could be resolved from the request.
    #[error("Identity could not be resolved")]
    IdentityUnresolved,

    /// The remote repo host's rate limit was exhausted. Carries the number
    /// of milliseconds the caller should wait before retrying.
    #[error("Remote host quota exhausted, retry after {retry_after_ms}ms")]
    QuotaExhausted { retry_after_ms: u64 },

    /// The requested branch does not exist on the remote repo host.
    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    /// The remote repo host could not be reached at all (network failure,
    /// DNS failure, 5xx from the host).
    #[error("Remote repo host unreachable: {0}")]
    Unreachable(String),

    /// The KV store backing the lock registry is unavailable.
    #[error("Lock store unavailable: {0}")]
    LockStoreUnavailable(String),

    /// JSON serialization/deserialization error.
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Catch-all for conditions that should not occur but must still be
    /// represented rather than panicking.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::InternalError(msg.into())
    }

    /// True for errors that should surface to an agent as an `OFFLINE`/`STOP`
    /// tool-call envelope rather than an opaque HTTP failure (spec.md §4.9).
    pub fn is_remote_host_failure(&self) -> bool {
        matches!(
            self,
            Error::QuotaExhausted { .. } | Error::BranchNotFound(_) | Error::Unreachable(_)
        )
    }
}

/// A specialized [`Result`] type for relay-core operations.
pub type Result<T> = core::result::Result<T, Error>;

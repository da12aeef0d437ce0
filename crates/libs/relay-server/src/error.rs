//! HTTP-facing error handling for Relay's request plane.
//!
//! Wraps [`relay_core::Error`] (the domain-complete error type) with the
//! transport concerns the core has no business knowing about: HTTP status
//! codes, a machine-readable error code, and a bearer-secret failure for the
//! cleanup endpoint. Status mapping follows the error-to-status table.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use relay_core::Error as CoreError;
use serde::Serialize;
use thiserror::Error;

/// Machine-readable error codes, stable for client-side handling.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    RateLimited,
    RemoteUnreachable,
    BranchNotFound,
    LockStoreUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::RemoteUnreachable => "REMOTE_UNREACHABLE",
            ErrorCode::BranchNotFound => "BRANCH_NOT_FOUND",
            ErrorCode::LockStoreUnavailable => "LOCK_STORE_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str(),
            error: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after_ms: u64) -> Self {
        self.retry_after_ms = Some(retry_after_ms);
        self
    }
}

/// Server-level error wrapping the domain error plus the auth failure the
/// core has no concept of.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("unauthorized")]
    Unauthorized,
}

/// Maps a core error to its HTTP status. `BranchNotFound` is deliberately
/// 500, not 404: the tool adapter watches for exactly this signal to retry
/// the call against the fallback branch.
fn map_core_error_to_status(error: &CoreError) -> StatusCode {
    match error {
        CoreError::Validation(_) | CoreError::IdentityUnresolved => StatusCode::BAD_REQUEST,
        CoreError::QuotaExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
        CoreError::BranchNotFound(_)
        | CoreError::Unreachable(_)
        | CoreError::LockStoreUnavailable(_)
        | CoreError::SerdeJson(_)
        | CoreError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The message surfaced in the HTTP response body. Distinct from `Display`
/// (used for logging, which keeps the `"Validation error: "`-style prefix
/// per variant for grep-ability) — `Validation`'s body message is the bare
/// client-supplied string spec.md §7's 400 example shows, with no prefix.
fn client_message(error: &CoreError) -> String {
    match error {
        CoreError::Validation(msg) => msg.clone(),
        other => other.to_string(),
    }
}

fn map_core_error_to_code(error: &CoreError) -> ErrorCode {
    match error {
        CoreError::Validation(_) | CoreError::IdentityUnresolved => ErrorCode::BadRequest,
        CoreError::QuotaExhausted { .. } => ErrorCode::RateLimited,
        CoreError::BranchNotFound(_) => ErrorCode::BranchNotFound,
        CoreError::Unreachable(_) => ErrorCode::RemoteUnreachable,
        CoreError::LockStoreUnavailable(_) => ErrorCode::LockStoreUnavailable,
        CoreError::SerdeJson(_) | CoreError::InternalError(_) => ErrorCode::InternalError,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        tracing::error!(error = ?self, "request error");

        let (status, response) = match self {
            ServerError::Core(ref e) => {
                let status = map_core_error_to_status(e);
                let code = map_core_error_to_code(e);
                let mut response = ErrorResponse::new(code, client_message(e));
                if let CoreError::QuotaExhausted { retry_after_ms } = e {
                    response = response.with_retry_after(*retry_after_ms);
                }
                (status, response)
            }
            ServerError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new(ErrorCode::Unauthorized, "authentication required"),
            ),
        };

        (status, Json(response)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

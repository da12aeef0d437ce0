//! Tool-call adapter behavior (spec.md §4.10 "Tool-call adapter behavior").
//!
//! Transport-agnostic logic shared by `relay-server`'s `tools/call` dispatch:
//! identity normalization, the `master` → `main` branch retry, and mapping a
//! failed internal call into the constant `orchestration_command` envelope
//! agents expect regardless of failure mode (spec.md §7 propagation policy).

use relay_core::error::Error as CoreError;
use relay_core::orchestration::{Action, OrchestrationCommand};
use serde::Serialize;

/// The branch an adapter assumes when the caller doesn't supply one.
pub const DEFAULT_BRANCH: &str = "master";
/// The branch retried exactly once after [`DEFAULT_BRANCH`] fails to resolve.
pub const FALLBACK_BRANCH: &str = "main";

/// Trims `raw` and falls back to `"anonymous"`; the adapter's own
/// normalization of the tool call's `username` argument before it becomes
/// both identity headers on the internal call.
pub fn normalize_username(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(relay_core::identity::Identity::ANONYMOUS)
        .to_string()
}

/// True iff the adapter should retry the internal call once with
/// [`FALLBACK_BRANCH`]: the caller didn't supply a branch, the adapter used
/// [`DEFAULT_BRANCH`], and that call failed with branch-not-found.
pub fn should_retry_with_fallback_branch(branch_was_supplied: bool, error: &CoreError) -> bool {
    !branch_was_supplied && matches!(error, CoreError::BranchNotFound(_))
}

/// Which internal endpoint is being adapted — network failure maps to a
/// different action per tool (spec.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    CheckStatus,
    PostStatus,
}

/// The envelope surfaced to an agent when an internal call fails before
/// producing a normal orchestration decision.
#[derive(Debug, Clone, Serialize)]
pub struct ToolErrorEnvelope {
    pub status: &'static str,
    pub orchestration: OrchestrationCommand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

fn command(action: Action, reason: impl Into<String>) -> OrchestrationCommand {
    OrchestrationCommand {
        kind: "orchestration_command",
        action,
        command: None,
        reason: reason.into(),
    }
}

/// Maps an HTTP status and the underlying core error into the tool-result
/// envelope an agent client expects (spec.md §4.10 "Error mapping").
pub fn map_error_to_envelope(status: u16, error: &CoreError, kind: ToolKind) -> ToolErrorEnvelope {
    if let CoreError::QuotaExhausted { retry_after_ms } = error {
        return ToolErrorEnvelope {
            status: "OFFLINE",
            orchestration: command(
                Action::Stop,
                format!("Remote host rate limit exhausted; retry after {retry_after_ms}ms"),
            ),
            retry_after_ms: Some(*retry_after_ms),
        };
    }

    if status == 400 {
        return ToolErrorEnvelope {
            status: "ERROR",
            orchestration: command(Action::Stop, error.to_string()),
            retry_after_ms: None,
        };
    }

    if matches!(error, CoreError::Unreachable(_)) {
        let action = match kind {
            ToolKind::CheckStatus => Action::SwitchTask,
            ToolKind::PostStatus => Action::Stop,
        };
        return ToolErrorEnvelope {
            status: "OFFLINE",
            orchestration: command(action, format!("Remote host unreachable: {error}")),
            retry_after_ms: None,
        };
    }

    ToolErrorEnvelope {
        status: "ERROR",
        orchestration: command(Action::Stop, format!("HTTP {status}: {error}")),
        retry_after_ms: None,
    }
}

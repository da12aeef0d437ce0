//! # relay-mcp: tool schemas and adapter behavior for Relay's agent surface
//!
//! `relay-mcp` holds the pieces of the JSON-RPC/SSE tool-call surface
//! (spec.md §4.10) that are pure logic rather than transport: the two tool
//! schemas agents discover via `tools/list`, and the adapter behavior that
//! normalizes a tool call's arguments and maps a failed internal call into
//! the constant `orchestration_command` envelope agents expect. The JSON-RPC
//! framing, SSE responses, and Accept-header validation live in
//! `relay-server`.

pub mod adapter;
pub mod schema;

pub use adapter::{ToolErrorEnvelope, ToolKind, map_error_to_envelope, normalize_username, should_retry_with_fallback_branch};
pub use schema::{CheckStatusParams, ParameterSchema, PostStatusParams, ToolSchema, tool_schemas};

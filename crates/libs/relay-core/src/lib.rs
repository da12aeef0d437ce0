//! # relay-core: coordination domain logic for Relay
//!
//! `relay-core` holds the domain logic behind Relay's multi-agent
//! coordination surface: identity resolution, the remote repo client, the
//! import graph builder, the atomic lock registry, the orchestration
//! decision engine, and the activity feed. None of these types know about
//! HTTP or JSON-RPC — that's `relay-server`'s and `relay-mcp`'s job.
//!
//! ## Key modules
//!
//! - [`namespace`]: repo URL normalization and coordinate parsing (C3 data model)
//! - [`identity`]: agent/human identity resolution from request headers (C1)
//! - [`remote`]: remote repo host client trait + `octocrab`-backed implementation (C2)
//! - [`imports`]: regex import extraction and suffix-probing path resolution (C3/C4)
//! - [`kv`]: key-value store abstraction backing locks, graph cache, and activity (C5)
//! - [`locks`]: atomic multi-file lock registry (C6)
//! - [`graph`]: incremental dependency graph cache and builder (C7)
//! - [`orchestration`]: pure decision engine mapping lock state to agent actions (C8)
//! - [`activity`]: bounded per-namespace activity feed (C9)

pub mod activity;
pub mod error;
pub mod graph;
pub mod identity;
pub mod imports;
pub mod kv;
pub mod locks;
pub mod namespace;
pub mod orchestration;
pub mod remote;

pub use error::{Error, Result};

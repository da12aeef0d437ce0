//! End-to-end test utilities for Relay: builds a fully-assembled router
//! (`relay_server::build_router`) against `relay-core`'s `InMemoryKv` and a
//! scriptable fake remote client, rather than spinning up a real Redis
//! instance and a real GitHub-hosted repo, the way the teacher's e2e crate
//! drives a live `mcp-server` process over HTTP for its API tests — in-
//! process `tower::ServiceExt::oneshot` calls are the faster-feedback
//! equivalent for a service with no web UI to drive with a browser.

pub mod config;
pub mod fixtures;

pub use config::TestConfig;
pub use fixtures::{FakeRemoteClient, ScriptedKv, TestHarness};

//! Administrative CLI for Relay.
//!
//! `serve` runs the full request plane (`relay_server::run`); every other
//! subcommand operates on `relay-core`'s components directly, the way the
//! teacher's CLI runs `Projects`/`Guard`/`Archive` commands straight against
//! a `ModelManager` instead of round-tripping through its own HTTP server.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use relay_core::activity::ActivityLog;
use relay_core::graph::GraphStore;
use relay_core::identity::now_ms;
use relay_core::kv::{KvStore, RedisKv};
use relay_core::locks::LockRegistry;
use relay_core::namespace::{namespace_key, normalize_repo_url, parse_repo_coordinates};
use relay_core::remote::{GitHubRemoteClient, SharedRemoteClient};

#[derive(Parser, Debug)]
#[command(name = "relay", author, version, about = "Relay coordination service", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP request plane (REST + JSON-RPC/SSE surfaces).
    Serve,
    /// Sweep all known lock namespaces for expired locks.
    CleanupStaleLocks,
    /// Release every lock held in a namespace, regardless of owner.
    ReleaseAllLocks {
        /// Repository URL (any https/ssh/bare form Relay normalizes).
        repo_url: String,
        /// Branch name.
        branch: String,
    },
    /// Print a namespace's dependency graph as JSON.
    Graph {
        repo_url: String,
        branch: String,
        /// Force a rebuild instead of using the cached graph.
        #[arg(long, default_value_t = false)]
        regenerate: bool,
    },
    /// Print a namespace's activity feed as JSON.
    Activity {
        repo_url: String,
        branch: String,
        #[arg(long, default_value_t = relay_core::activity::DEFAULT_READ_LIMIT)]
        limit: usize,
    },
}

struct Components {
    kv: Arc<dyn KvStore>,
    locks: Arc<LockRegistry>,
    graph: Arc<GraphStore>,
    activity: Arc<ActivityLog>,
}

async fn build_components(config: &relay_common::RelayConfig) -> anyhow::Result<Components> {
    let kv: Arc<dyn KvStore> = Arc::new(RedisKv::connect(&config.kv.url, config.kv.token.as_deref()).await?);
    let remote: SharedRemoteClient = Arc::new(GitHubRemoteClient::new(config.remote.token.clone())?);
    let locks = Arc::new(LockRegistry::new(kv.clone()));
    let graph = Arc::new(GraphStore::new(kv.clone(), remote, locks.clone()));
    let activity = Arc::new(ActivityLog::new(kv.clone()));
    Ok(Components { kv, locks, graph, activity })
}

/// Parses `std::env::args` and runs the selected subcommand to completion.
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = relay_common::RelayConfig::load()?;
    relay_common::tracing::setup_tracing(config.server.log_format_json);

    match cli.command {
        Commands::Serve => {
            relay_server::run(config).await?;
        }
        Commands::CleanupStaleLocks => {
            let components = build_components(&config).await?;
            let now = now_ms();
            let namespaces = components.kv.scan_keys("locks:*").await?;
            let mut removed = 0u64;
            for ns in &namespaces {
                removed += components.locks.cleanup_expired(ns, now).await?;
            }
            println!("{}", serde_json::json!({ "namespaces_scanned": namespaces.len(), "locks_removed": removed }));
        }
        Commands::ReleaseAllLocks { repo_url, branch } => {
            let components = build_components(&config).await?;
            let normalized = normalize_repo_url(&repo_url)?;
            let lock_ns = format!("locks:{}", namespace_key(&normalized, &branch));
            let released = components.locks.release_all(&lock_ns).await?;
            println!("{}", serde_json::json!({ "success": true, "released": released }));
        }
        Commands::Graph { repo_url, branch, regenerate } => {
            let components = build_components(&config).await?;
            let coords = parse_repo_coordinates(&repo_url)?;
            let normalized = normalize_repo_url(&repo_url)?;
            let ns = namespace_key(&normalized, &branch);
            let lock_ns = format!("locks:{ns}");
            let now = now_ms();
            let (graph, locks) = components.graph.generate(&ns, &lock_ns, &coords, &branch, regenerate, now).await?;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "graph": graph, "locks": locks }))?);
        }
        Commands::Activity { repo_url, branch, limit } => {
            let normalized = normalize_repo_url(&repo_url)?;
            let ns = namespace_key(&normalized, &branch);
            let components = build_components(&config).await?;
            let events = components.activity.read(&ns, limit).await?;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "activity_events": events }))?);
        }
    }

    Ok(())
}

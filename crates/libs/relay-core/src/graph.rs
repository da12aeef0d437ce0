//! Graph Cache & Builder (C7, spec.md §4.7).
//!
//! Three keys per namespace: the serialized graph itself, a meta key holding
//! the commit sha of the last build, and a hash of `path -> blob sha` used to
//! diff against a freshly fetched tree. Builds are single-flight per
//! namespace: concurrent callers while a build is in flight await the same
//! result rather than racing the remote host.

use crate::error::{Error, Result};
use crate::imports::{extract_imports, is_supported_extension, resolve_module_ref};
use crate::kv::KvStore;
use crate::locks::{Lock, LockRegistry};
use crate::namespace::RepoCoordinates;
use crate::remote::SharedRemoteClient;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub language: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub generated_at_ms: u64,
    pub files_processed: usize,
    pub edges_found: usize,
}

/// A namespace's dependency graph, with lock-overlay info filled in at read
/// time by the caller (see `relay-server`'s `/check_status` and `/graph`
/// handlers) rather than stored alongside the graph itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub version: String,
    pub metadata: GraphMetadata,
}

impl Graph {
    fn sort_deterministically(&mut self) {
        self.nodes.sort_by(|a, b| a.id.cmp(&b.id));
        self.edges
            .sort_by(|a, b| (a.source.as_str(), a.target.as_str()).cmp(&(b.source.as_str(), b.target.as_str())));
    }

    /// True if an (undirected) edge connects `a` and `b`.
    pub fn are_neighbors(&self, a: &str, b: &str) -> bool {
        self.edges
            .iter()
            .any(|e| (e.source == a && e.target == b) || (e.source == b && e.target == a))
    }

    /// All paths adjacent (undirected) to `path`.
    pub fn neighbors_of(&self, path: &str) -> HashSet<String> {
        self.edges
            .iter()
            .filter_map(|e| {
                if e.source == path {
                    Some(e.target.clone())
                } else if e.target == path {
                    Some(e.source.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Files `g` such that a directed edge `g -> f` exists, for every `f` in
    /// `released` that isn't itself in `released` — spec.md's "orphaned
    /// dependency" definition.
    pub fn orphaned_dependencies(&self, released: &HashSet<String>) -> Vec<String> {
        let mut result: Vec<String> = self
            .edges
            .iter()
            .filter(|e| released.contains(&e.target) && !released.contains(&e.source))
            .map(|e| e.source.clone())
            .collect();
        result.sort();
        result.dedup();
        result
    }
}

/// What the caller should do with the current graph, per spec.md §4.7 step 1.
pub struct Staleness {
    pub current_head: String,
    pub stored_head: Option<String>,
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        self.stored_head.as_deref() != Some(self.current_head.as_str())
    }
}

/// `None` until the leader's build finishes, then the shared outcome every
/// waiter receives (errors are stringified since [`crate::error::Error`]
/// isn't `Clone`; waiters reconstitute them as [`crate::error::Error::InternalError`]).
type SharedBuildResult = Option<core::result::Result<(Graph, HashMap<String, Lock>), String>>;

pub struct GraphStore {
    kv: Arc<dyn KvStore>,
    remote: SharedRemoteClient,
    locks: Arc<LockRegistry>,
    in_flight: Mutex<HashMap<String, watch::Receiver<SharedBuildResult>>>,
}

fn graph_key(ns: &str) -> String {
    format!("graph:{ns}")
}
fn meta_key(ns: &str) -> String {
    format!("graph:meta:{ns}")
}
fn file_shas_key(ns: &str) -> String {
    format!("graph:file_shas:{ns}")
}

impl GraphStore {
    pub fn new(kv: Arc<dyn KvStore>, remote: SharedRemoteClient, locks: Arc<LockRegistry>) -> Self {
        Self {
            kv,
            remote,
            locks,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the stored graph, overlaid with a fresh lock snapshot. Never
    /// touches the remote host. Returns `None` if absent or unparsable.
    pub async fn get_cached(&self, ns: &str, lock_namespace_key: &str, now: u64) -> Result<Option<(Graph, HashMap<String, Lock>)>> {
        let Some(raw) = self.kv.get(&graph_key(ns)).await? else {
            return Ok(None);
        };
        let Ok(graph) = serde_json::from_str::<Graph>(&raw) else {
            return Ok(None);
        };
        let locks = self.locks.list(lock_namespace_key, now).await?;
        Ok(Some((graph, locks)))
    }

    pub async fn needs_update(&self, ns: &str, coords: &RepoCoordinates, branch: &str) -> Result<Staleness> {
        let current_head = self.remote.get_branch_head(coords, branch).await?;
        let stored_head = self.kv.get(&meta_key(ns)).await?;
        Ok(Staleness { current_head, stored_head })
    }

    /// Builds (or awaits and shares the in-flight build's result for) the
    /// graph at the namespace's current remote head. Single-flight per
    /// namespace within this process: every waiter receives the exact
    /// outcome the leader computed, rather than re-entering `build` itself.
    pub async fn generate(
        &self,
        ns: &str,
        lock_namespace_key: &str,
        coords: &RepoCoordinates,
        branch: &str,
        force: bool,
        now: u64,
    ) -> Result<(Graph, HashMap<String, Lock>)> {
        let mut rx = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(ns) {
                Some(existing) => existing.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(ns.to_string(), rx.clone());
                    drop(in_flight);
                    return self.lead_build(ns, tx, lock_namespace_key, coords, branch, force, now).await;
                }
            }
        };

        metrics::counter!("relay_graph_single_flight_wait_total").increment(1);

        // `borrow()` reflects the latest value at the instant of the call, so
        // checking it before awaiting `changed()` is race-free even if the
        // leader finished between our lock release above and this check.
        if let Some(result) = rx.borrow().clone() {
            return result.map_err(Error::internal);
        }

        rx.changed()
            .await
            .map_err(|_| Error::internal("graph build sender dropped before completion"))?;

        rx.borrow()
            .clone()
            .unwrap_or_else(|| Err("graph build finished with no recorded result".to_string()))
            .map_err(Error::internal)
    }

    /// Runs the actual build as the single-flight leader for `ns`, then
    /// publishes the (stringified, on error) outcome to every waiter queued
    /// behind `tx` and clears the in-flight entry.
    async fn lead_build(
        &self,
        ns: &str,
        tx: watch::Sender<SharedBuildResult>,
        lock_namespace_key: &str,
        coords: &RepoCoordinates,
        branch: &str,
        force: bool,
        now: u64,
    ) -> Result<(Graph, HashMap<String, Lock>)> {
        let start = Instant::now();
        let result = self.build(ns, lock_namespace_key, coords, branch, force, now).await;
        metrics::histogram!("relay_graph_build_duration_seconds").record(start.elapsed().as_secs_f64());

        let shared = match &result {
            Ok(ok) => Ok(ok.clone()),
            Err(e) => Err(e.to_string()),
        };
        let _ = tx.send(Some(shared));

        self.in_flight.lock().await.remove(ns);

        result
    }

    async fn build(
        &self,
        ns: &str,
        lock_namespace_key: &str,
        coords: &RepoCoordinates,
        branch: &str,
        force: bool,
        now: u64,
    ) -> Result<(Graph, HashMap<String, Lock>)> {
        let current_head = self.remote.get_branch_head(coords, branch).await?;
        let stored_meta = self.kv.get(&meta_key(ns)).await?;
        let existing_raw = self.kv.get(&graph_key(ns)).await?;
        let existing: Option<Graph> = existing_raw.as_deref().and_then(|r| serde_json::from_str(r).ok());

        if !force {
            if let (Some(stored), Some(graph)) = (&stored_meta, &existing) {
                if stored == &current_head {
                    let locks = self.locks.list(lock_namespace_key, now).await?;
                    return Ok((graph.clone(), locks));
                }
            }
        }

        let tree = self.remote.get_recursive_tree(coords, &current_head).await?;
        let tree: Vec<_> = tree.into_iter().filter(|e| is_supported_extension(&e.path)).collect();

        let stored_shas = self.kv.hgetall(&file_shas_key(ns)).await?;
        let tree_by_path: HashMap<String, String> =
            tree.iter().map(|e| (e.path.clone(), e.sha.clone())).collect();

        let new_paths: Vec<String> = tree_by_path
            .keys()
            .filter(|p| !stored_shas.contains_key(*p))
            .cloned()
            .collect();
        let changed_paths: Vec<String> = tree_by_path
            .iter()
            .filter(|(p, sha)| stored_shas.get(*p).is_some_and(|old| old != *sha))
            .map(|(p, _)| p.clone())
            .collect();
        let deleted_paths: Vec<String> = stored_shas
            .keys()
            .filter(|p| !tree_by_path.contains_key(*p))
            .cloned()
            .collect();

        let mut nodes: Vec<Node> = existing.as_ref().map(|g| g.nodes.clone()).unwrap_or_default();
        let mut edges: Vec<Edge> = existing.as_ref().map(|g| g.edges.clone()).unwrap_or_default();

        let deleted_set: HashSet<&String> = deleted_paths.iter().collect();
        let changed_set: HashSet<&String> = changed_paths.iter().collect();

        nodes.retain(|n| !deleted_set.contains(&n.id));
        edges.retain(|e| !deleted_set.contains(&e.source) && !deleted_set.contains(&e.target));
        edges.retain(|e| !changed_set.contains(&e.source));

        // A corrupted cache: SHA map lingers but nodes never got populated
        // and the diff found nothing — force a full rebuild rather than
        // silently returning an empty graph.
        let corrupted_cache = !tree_by_path.is_empty() && nodes.is_empty() && new_paths.is_empty() && changed_paths.is_empty();
        let full_rebuild = existing.is_none() || corrupted_cache;

        let files_to_process: Vec<String> = if full_rebuild {
            nodes.clear();
            edges.clear();
            tree_by_path.keys().cloned().collect()
        } else {
            new_paths.iter().chain(changed_paths.iter()).cloned().collect()
        };

        let known_paths: HashSet<String> = tree_by_path.keys().cloned().collect();
        let mut existing_node_ids: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let mut existing_edges: HashSet<(String, String)> =
            edges.iter().map(|e| (e.source.clone(), e.target.clone())).collect();

        for path in &files_to_process {
            let Some(tree_entry) = tree.iter().find(|e| &e.path == path) else {
                continue;
            };
            let size = tree_entry.size;

            let content = match self.remote.get_blob_content(coords, path, &current_head).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(path, error = %e, "skipping file after blob fetch failure during graph build");
                    continue;
                }
            };
            let content = String::from_utf8_lossy(&content).into_owned();

            if existing_node_ids.contains(path) {
                // `changed` file: node survives but its size/language may
                // have moved under it.
                if let Some(existing) = nodes.iter_mut().find(|n| &n.id == path) {
                    existing.language = Some(language_name(path));
                    existing.size = size;
                }
            } else {
                nodes.push(Node {
                    id: path.clone(),
                    language: Some(language_name(path)),
                    size,
                });
                existing_node_ids.insert(path.clone());
            }

            for module_ref in extract_imports(&content, path) {
                if let Some(target) = resolve_module_ref(&module_ref, path, &known_paths) {
                    let key = (path.clone(), target.clone());
                    if existing_edges.insert(key) {
                        edges.push(Edge {
                            source: path.clone(),
                            target,
                            label: "import".to_string(),
                        });
                    }
                }
            }
        }

        let mut graph = Graph {
            nodes,
            edges,
            version: current_head.clone(),
            metadata: GraphMetadata {
                generated_at_ms: now,
                files_processed: files_to_process.len(),
                edges_found: existing_edges.len(),
            },
        };
        graph.sort_deterministically();

        self.kv.set(&graph_key(ns), &serde_json::to_string(&graph)?).await?;
        self.kv.set(&meta_key(ns), &current_head).await?;
        if !deleted_paths.is_empty() {
            self.kv.hdel(&file_shas_key(ns), &deleted_paths).await?;
        }
        for (path, sha) in &tree_by_path {
            self.kv.hset(&file_shas_key(ns), path, sha).await?;
        }

        let locks = self.locks.list(lock_namespace_key, now).await?;
        Ok((graph, locks))
    }
}

fn language_name(path: &str) -> String {
    match crate::imports::detect_language(path) {
        crate::imports::Language::JsFamily => "js".to_string(),
        crate::imports::Language::Python => "python".to_string(),
        crate::imports::Language::Unknown => "unknown".to_string(),
    }
}

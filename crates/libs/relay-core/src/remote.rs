//! Remote Repo Client (C2, spec.md §4.2).
//!
//! Read-only access to the repository host: branch HEAD (with a short
//! in-process cache), recursive tree listing, and blob content. Quota
//! exhaustion is surfaced distinctly so the request plane can answer with
//! HTTP 429 and a `retry_after_ms` hint rather than an opaque 500.

use crate::error::{Error, Result};
use crate::namespace::RepoCoordinates;
use async_trait::async_trait;
use octocrab::Octocrab;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// One entry of a recursive tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub sha: String,
    pub size: Option<u64>,
    pub entry_type: TreeEntryType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEntryType {
    Blob,
    Tree,
    Other,
}

/// Read-only access to a repository host. `getBranchHead` on the object
/// holds a short TTL cache internally; all other methods hit the network
/// every call.
#[async_trait]
pub trait RemoteRepoClient: Send + Sync {
    async fn get_branch_head(&self, coords: &RepoCoordinates, branch: &str) -> Result<String>;
    async fn get_recursive_tree(&self, coords: &RepoCoordinates, commit_sha: &str) -> Result<Vec<TreeEntry>>;
    async fn get_blob_content(&self, coords: &RepoCoordinates, path: &str, commit_sha: &str) -> Result<Vec<u8>>;
}

const HEAD_CACHE_TTL: Duration = Duration::from_secs(30);

struct CachedHead {
    sha: String,
    fetched_at: Instant,
}

/// `octocrab`-backed [`RemoteRepoClient`] for GitHub-hosted repositories.
/// Holds a small `(owner, repo, branch) -> sha` cache capped at 30s, per
/// spec.md §4.2's "short in-process cache" requirement.
pub struct GitHubRemoteClient {
    client: Octocrab,
    head_cache: Mutex<HashMap<String, CachedHead>>,
}

impl GitHubRemoteClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        let mut builder = Octocrab::builder();
        if let Some(t) = token {
            builder = builder.personal_token(t);
        }
        let client = builder
            .build()
            .map_err(|e| Error::InternalError(format!("failed to build GitHub client: {e}")))?;
        Ok(Self {
            client,
            head_cache: Mutex::new(HashMap::new()),
        })
    }

    fn cache_key(coords: &RepoCoordinates, branch: &str) -> String {
        format!("{}/{}/{}@{}", coords.host, coords.owner, coords.repo, branch)
    }

    /// Used when quota is exhausted and the live rate-limit reset time can't
    /// be read back (the `/rate_limit` lookup itself failing, most likely to
    /// the same exhausted quota).
    const FALLBACK_RETRY_AFTER_MS: u64 = 60_000;

    /// Reads GitHub's own `/rate_limit` endpoint for the `core` resource's
    /// reset time and converts it to a millisecond wait, mirroring what the
    /// `Retry-After`/`x-ratelimit-reset` response headers would say on the
    /// request that actually got rate-limited.
    async fn retry_after_ms(&self) -> u64 {
        match self.client.ratelimit().get().await {
            Ok(limits) => {
                let now_secs = crate::identity::now_ms() / 1_000;
                let reset_secs = u64::try_from(limits.resources.core.reset).unwrap_or(now_secs);
                reset_secs.saturating_sub(now_secs).saturating_mul(1_000).max(1_000)
            }
            Err(_) => Self::FALLBACK_RETRY_AFTER_MS,
        }
    }

    async fn map_octocrab_err(&self, e: octocrab::Error) -> Error {
        match &e {
            octocrab::Error::GitHub { source, .. } => {
                let status = source.status_code.as_u16();
                if status == 429 || status == 403 {
                    // GitHub signals quota exhaustion with 403 + rate-limit
                    // headers nearly as often as with 429; either way this
                    // is QuotaExhausted from the caller's perspective.
                    Error::QuotaExhausted { retry_after_ms: self.retry_after_ms().await }
                } else if status == 404 {
                    Error::BranchNotFound(source.message.clone())
                } else {
                    Error::Unreachable(format!("GitHub API error {status}: {}", source.message))
                }
            }
            other => Error::Unreachable(other.to_string()),
        }
    }
}

#[async_trait]
impl RemoteRepoClient for GitHubRemoteClient {
    async fn get_branch_head(&self, coords: &RepoCoordinates, branch: &str) -> Result<String> {
        let key = Self::cache_key(coords, branch);
        {
            let cache = self.head_cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.fetched_at.elapsed() < HEAD_CACHE_TTL {
                    return Ok(entry.sha.clone());
                }
            }
        }

        let branch_info = match self
            .client
            .repos(&coords.owner, &coords.repo)
            .get_ref(&octocrab::params::repos::Reference::Branch(branch.to_string()))
            .await
        {
            Ok(v) => v,
            Err(e) => return Err(self.map_octocrab_err(e).await),
        };

        let sha = match branch_info.object {
            octocrab::models::repos::Object::Commit { sha, .. } => sha,
            octocrab::models::repos::Object::Tag { sha, .. } => sha,
            _ => return Err(Error::BranchNotFound(branch.to_string())),
        };

        let mut cache = self.head_cache.lock().await;
        cache.insert(
            key,
            CachedHead {
                sha: sha.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(sha)
    }

    async fn get_recursive_tree(&self, coords: &RepoCoordinates, commit_sha: &str) -> Result<Vec<TreeEntry>> {
        let tree = match self
            .client
            .repos(&coords.owner, &coords.repo)
            .get_tree(&commit_sha.parse().map_err(|_| Error::validation("invalid commit sha"))?)
            .recursive(true)
            .send()
            .await
        {
            Ok(v) => v,
            Err(e) => return Err(self.map_octocrab_err(e).await),
        };

        Ok(tree
            .tree
            .into_iter()
            .map(|entry| TreeEntry {
                path: entry.path,
                sha: entry.sha,
                size: entry.size.map(|s| s as u64),
                entry_type: match entry.r#type.as_str() {
                    "blob" => TreeEntryType::Blob,
                    "tree" => TreeEntryType::Tree,
                    _ => TreeEntryType::Other,
                },
            })
            .collect())
    }

    async fn get_blob_content(&self, coords: &RepoCoordinates, path: &str, commit_sha: &str) -> Result<Vec<u8>> {
        let content = match self.client.repos(&coords.owner, &coords.repo).raw_file(commit_sha, path).await {
            Ok(v) => v,
            Err(e) => return Err(self.map_octocrab_err(e).await),
        };

        Ok(content.to_vec())
    }
}

pub type SharedRemoteClient = Arc<dyn RemoteRepoClient>;

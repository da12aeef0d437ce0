//! Repository coordinate normalization (spec.md §3 "Repository coordinates").
//!
//! A `(normalized url, branch)` pair identifies a namespace. Normalization is
//! pure string manipulation — lowercase host/owner/repo, strip `.git` and
//! trailing slashes — ported from the teacher's remote-URL canonicalization
//! routine (`normalize_remote_url` in `project_identity.rs`), generalized
//! from a git-remote-string parser to an HTTP(S) repo-URL parser.

use crate::error::{Error, Result};

/// Owner/repo coordinates parsed from a repo URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCoordinates {
    pub host: String,
    pub owner: String,
    pub repo: String,
}

/// Normalizes a raw repo URL into its canonical form: lowercase host and
/// owner/repo, no scheme, no trailing `.git`, no trailing slash.
///
/// Rejects input that doesn't resolve to a `host/owner/repo` shape.
pub fn normalize_repo_url(raw: &str) -> Result<String> {
    let coords = parse_repo_coordinates(raw)?;
    Ok(format!("{}/{}/{}", coords.host, coords.owner, coords.repo))
}

/// Parses `(host, owner, repo)` out of a raw repo URL.
///
/// Accepts `https://host/owner/repo(.git)?`, `git@host:owner/repo(.git)?`,
/// and bare `host/owner/repo`. Fails with [`Error::Validation`] for anything
/// that doesn't resolve to exactly those three segments.
pub fn parse_repo_coordinates(raw: &str) -> Result<RepoCoordinates> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("repo_url is empty"));
    }

    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);

    // git@host:owner/repo form
    let normalized = if let Some(rest) = without_scheme.strip_prefix("git@") {
        rest.replacen(':', "/", 1)
    } else {
        without_scheme.to_string()
    };

    let without_trailing_slash = normalized.trim_end_matches('/');
    let without_git_suffix = without_trailing_slash
        .strip_suffix(".git")
        .unwrap_or(without_trailing_slash);

    let segments: Vec<&str> = without_git_suffix
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    if segments.len() < 3 {
        return Err(Error::validation(format!(
            "repo_url does not resolve to host/owner/repo: {raw}"
        )));
    }

    // Keep the last three segments: ...host/owner/repo
    let n = segments.len();
    let host = segments[n - 3].to_lowercase();
    let owner = segments[n - 2].to_lowercase();
    let repo = segments[n - 1].to_lowercase();

    if host.is_empty() || owner.is_empty() || repo.is_empty() {
        return Err(Error::validation(format!("invalid repo_url: {raw}")));
    }

    Ok(RepoCoordinates { host, owner, repo })
}

/// Builds the KV namespace key prefix `<normalized repo url>:<branch>` shared
/// by locks, graph, and activity keys (spec.md §6.9).
pub fn namespace_key(normalized_repo_url: &str, branch: &str) -> String {
    format!("{normalized_repo_url}:{branch}")
}

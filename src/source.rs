//! Source Acquirer (spec §4.5) — populates a stack's project directory
//! from either its own folder (`LocalSource`) or a remote archive
//! (`RemoteArchiveSource`), with a commit-cache fast path for the latter.

use crate::config::stack::{Source, StackConfig};
use crate::config::TopLevelConfig;
use crate::error::SurekError;
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitCacheEntry {
    pub commit: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitCache(pub HashMap<String, CommitCacheEntry>);

impl CommitCache {
    pub fn load(cwd: &Path) -> Result<Self, SurekError> {
        let path = paths::commit_cache_path(cwd).map_err(|e| SurekError::source(e.to_string()))?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SurekError::source(format!("reading commit cache: {e}")))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content)
            .map_err(|e| SurekError::source(format!("invalid commit cache: {e}")))
    }

    pub fn save(&self, cwd: &Path) -> Result<(), SurekError> {
        let path = paths::commit_cache_path(cwd).map_err(|e| SurekError::source(e.to_string()))?;
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| SurekError::source(format!("encoding commit cache: {e}")))?;
        std::fs::write(&path, content)
            .map_err(|e| SurekError::source(format!("writing commit cache: {e}")))
    }

    pub fn get(&self, stack_name: &str) -> Option<&CommitCacheEntry> {
        self.0.get(stack_name)
    }

    /// Updated only on a successful fetch; on failure the prior entry is
    /// left untouched by the caller never invoking this (spec invariant 5).
    pub fn set(&mut self, stack_name: &str, commit: String) {
        self.0.insert(
            stack_name.to_string(),
            CommitCacheEntry {
                commit,
                updated_at: Utc::now(),
            },
        );
    }
}

/// Acquires the source for `stack` into `<cwd>/surek-data/projects/<name>/`
/// and returns that directory's path.
pub async fn acquire(
    cwd: &Path,
    stack_dir: &Path,
    stack: &StackConfig,
    top: &TopLevelConfig,
    pull: bool,
    client: &reqwest::Client,
) -> Result<PathBuf, SurekError> {
    let target = paths::project_dir(cwd, &stack.name).map_err(|e| SurekError::source(e.to_string()))?;

    match &stack.source {
        Source::Local => {
            if target.exists() {
                std::fs::remove_dir_all(&target)
                    .map_err(|e| SurekError::source(format!("clearing project dir: {e}")))?;
            }
            copy_dir_recursive(stack_dir, &target)
                .map_err(|e| SurekError::source(format!("copying stack folder: {e}")))?;
        }
        Source::RemoteArchive {
            owner,
            repo,
            git_ref,
            ..
        } => {
            let token = top.source_auth.as_ref().map(|s| s.token.clone());
            let mut cache = CommitCache::load(cwd)?;

            let mut reused = false;
            if !pull && target.exists() && cache.get(&stack.name).is_some() {
                match fetch_head_commit(client, owner, repo, git_ref, token.as_ref()).await {
                    Ok(head) if head == cache.get(&stack.name).unwrap().commit => {
                        debug!("cache hit for stack {}: commit {head} unchanged", stack.name);
                        reused = true;
                    }
                    Ok(_) => {}
                    Err(_) => {}
                }
            }

            if !reused {
                if target.exists() {
                    std::fs::remove_dir_all(&target)
                        .map_err(|e| SurekError::source(format!("clearing project dir: {e}")))?;
                }
                info!("downloading archive for {owner}/{repo}#{git_ref}");
                let commit = download_and_unpack(client, owner, repo, git_ref, token.as_ref(), &target).await?;
                cache.set(&stack.name, commit);
                cache.save(cwd)?;
            }

            // Local edits always win: overlay the stack folder on top,
            // except for a prior patched compose file.
            overlay_dir(stack_dir, &target, paths::PATCHED_COMPOSE_FILE)
                .map_err(|e| SurekError::source(format!("overlaying stack folder: {e}")))?;
        }
    }

    Ok(target)
}

/// Base URL for the archive source's commit/zipball endpoints. Overridable
/// via `SUREK_GITHUB_API_BASE` so tests can point it at a `wiremock` server
/// instead of the real GitHub API.
fn github_api_base() -> String {
    std::env::var("SUREK_GITHUB_API_BASE").unwrap_or_else(|_| "https://api.github.com".to_string())
}

async fn fetch_head_commit(
    client: &reqwest::Client,
    owner: &str,
    repo: &str,
    git_ref: &str,
    token: Option<&redact::Secret<String>>,
) -> Result<String, SurekError> {
    use redact::ExposeSecret;
    let base = github_api_base();
    let url = format!("{base}/repos/{owner}/{repo}/commits/{git_ref}");
    let mut req = client
        .get(&url)
        .header("Accept", "application/vnd.github.v3+json")
        .header("User-Agent", "surek");
    if let Some(t) = token {
        req = req.header("Authorization", format!("token {}", t.expose_secret()));
    }
    let resp = req.send().await.map_err(|e| SurekError::source(e.to_string()))?;
    map_github_errors(&resp, owner, repo, git_ref)?;
    let body: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| SurekError::source(format!("invalid commit response: {e}")))?;
    body.get("sha")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| SurekError::source("commit response missing sha"))
}

async fn download_and_unpack(
    client: &reqwest::Client,
    owner: &str,
    repo: &str,
    git_ref: &str,
    token: Option<&redact::Secret<String>>,
    target: &Path,
) -> Result<String, SurekError> {
    use redact::ExposeSecret;
    let base = github_api_base();
    let url = format!("{base}/repos/{owner}/{repo}/zipball/{git_ref}");
    let mut req = client
        .get(&url)
        .header("Accept", "application/vnd.github.v3+json")
        .header("User-Agent", "surek")
        .timeout(std::time::Duration::from_secs(120));
    if let Some(t) = token {
        req = req.header("Authorization", format!("token {}", t.expose_secret()));
    }

    let resp = req.send().await.map_err(|e| SurekError::source(e.to_string()))?;
    map_github_errors(&resp, owner, repo, git_ref)?;
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| SurekError::source(format!("downloading archive: {e}")))?;

    let tmp = tempfile::tempdir().map_err(|e| SurekError::source(e.to_string()))?;
    let reader = std::io::Cursor::new(bytes);
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| SurekError::source(format!("bad archive: {e}")))?;
    archive
        .extract(tmp.path())
        .map_err(|e| SurekError::source(format!("bad archive: {e}")))?;

    let entries: Vec<_> = std::fs::read_dir(tmp.path())
        .map_err(|e| SurekError::source(e.to_string()))?
        .filter_map(|e| e.ok())
        .collect();
    if entries.len() != 1 {
        return Err(SurekError::source(
            "expected a single root folder in the zip file",
        ));
    }
    let root = entries[0].path();
    if !root.is_dir() {
        return Err(SurekError::source(
            "the single item in the zip is not a folder",
        ));
    }
    let folder_name = root
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SurekError::source("bad archive"))?;
    let commit_sha = folder_name
        .rsplit('-')
        .next()
        .ok_or_else(|| SurekError::source("could not derive commit sha from archive"))?
        .to_string();

    std::fs::create_dir_all(target).map_err(|e| SurekError::source(e.to_string()))?;
    copy_dir_recursive(&root, target).map_err(|e| SurekError::source(e.to_string()))?;

    Ok(commit_sha)
}

fn map_github_errors(
    resp: &reqwest::Response,
    owner: &str,
    repo: &str,
    git_ref: &str,
) -> Result<(), SurekError> {
    match resp.status().as_u16() {
        200..=299 => Ok(()),
        404 => Err(SurekError::source(format!(
            "repository or ref not found: {owner}/{repo}#{git_ref}"
        ))),
        401 => Err(SurekError::source("authentication failed")),
        other => Err(SurekError::source(format!("archive endpoint returned {other}"))),
    }
}

fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

/// Like `copy_dir_recursive`, but skips `skip_file_name` at the top level
/// and overwrites any existing destination entries with the same name.
fn overlay_dir(from: &Path, to: &Path, skip_file_name: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        if entry.file_name() == skip_file_name {
            continue;
        }
        let dest = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            overlay_dir(&entry.path(), &dest, skip_file_name)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

//! Git plumbing: remote tags, blob-less mirrors, history and manifest versions

use crate::core::error::SyncError;
use crate::core::traits::CommitInfo;
use crate::security::{CommandError, SafeCommandExecutor};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const GIT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Git access for one run, keeping blob-less bare mirrors under `cache_root`
#[derive(Debug)]
pub struct GitClient {
    cache_root: PathBuf,
    mirrors: Mutex<HashMap<String, PathBuf>>,
}

impl GitClient {
    pub fn new<P: Into<PathBuf>>(cache_root: P) -> Self {
        Self {
            cache_root: cache_root.into(),
            mirrors: Mutex::new(HashMap::new()),
        }
    }

    async fn executor(&self, dir: &Path) -> Result<SafeCommandExecutor, SyncError> {
        fs::create_dir_all(dir).await.map_err(|e| SyncError::Command {
            message: format!("failed to create {}: {}", dir.display(), e),
        })?;
        let mut executor = SafeCommandExecutor::new(dir)?;
        executor.set_timeout(GIT_TIMEOUT);
        Ok(executor)
    }

    /// Tag names advertised by the remote
    pub async fn tags(&self, repository: &str) -> Result<Vec<String>, SyncError> {
        let executor = self.executor(&self.cache_root).await?;
        let output = executor
            .run("git", &["ls-remote", "--tags", "--refs", repository])
            .await?;
        Ok(parse_ls_remote_tags(&output))
    }

    /// Commits of `branch` (remote default branch when `None`), newest first
    pub async fn commits(
        &self,
        repository: &str,
        branch: Option<&str>,
    ) -> Result<Vec<CommitInfo>, SyncError> {
        let mirror = self.mirror(repository).await?;
        let executor = self.executor(&mirror).await?;
        let rev = branch.unwrap_or("HEAD");

        match executor
            .run("git", &["log", "--format=%H%x09%cI", rev, "--"])
            .await
        {
            Ok(output) => Ok(parse_log(&output)),
            Err(CommandError::NonZeroExit { stderr, .. }) => {
                warn!("no history for {} at {}: {}", repository, rev, stderr);
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `version` of the extension manifest at `sha`, if it has one
    pub async fn version_at(
        &self,
        repository: &str,
        location: Option<&str>,
        sha: &str,
    ) -> Result<Option<String>, SyncError> {
        let mirror = self.mirror(repository).await?;
        let executor = self.executor(&mirror).await?;
        let object = format!("{}:{}", sha, manifest_path(location));

        match executor.run("git", &["show", &object]).await {
            Ok(manifest) => Ok(parse_manifest_version(&manifest)),
            Err(CommandError::NonZeroExit { stderr, .. }) => {
                debug!("no manifest at {}: {}", object, stderr);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Blob-less bare mirror of `repository`, cloned on first use
    async fn mirror(&self, repository: &str) -> Result<PathBuf, SyncError> {
        let mut mirrors = self.mirrors.lock().await;
        if let Some(path) = mirrors.get(repository) {
            return Ok(path.clone());
        }

        let name = mirror_name(repository);
        let path = self.cache_root.join(&name);
        if fs::metadata(&path).await.is_ok() {
            fs::remove_dir_all(&path).await.map_err(|e| SyncError::Command {
                message: format!("failed to clean {}: {}", path.display(), e),
            })?;
        }

        let executor = self.executor(&self.cache_root).await?;
        executor
            .run(
                "git",
                &["clone", "--bare", "--filter=blob:none", repository, &name],
            )
            .await?;

        mirrors.insert(repository.to_string(), path.clone());
        Ok(path)
    }
}

/// Tag names from `git ls-remote --tags --refs` output
pub fn parse_ls_remote_tags(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split('\t').nth(1))
        .filter_map(|reference| reference.strip_prefix("refs/tags/"))
        .map(str::to_string)
        .collect()
}

/// Commits from `git log --format=%H%x09%cI` output
pub fn parse_log(output: &str) -> Vec<CommitInfo> {
    output
        .lines()
        .filter_map(|line| {
            let (sha, date) = line.split_once('\t')?;
            let timestamp = DateTime::parse_from_rfc3339(date.trim()).ok()?;
            Some(CommitInfo {
                sha: sha.trim().to_string(),
                timestamp: timestamp.with_timezone(&Utc),
            })
        })
        .collect()
}

/// Repository-relative path of the extension manifest
pub fn manifest_path(location: Option<&str>) -> String {
    let location = location
        .map(|l| l.trim_start_matches("./").trim_matches('/'))
        .filter(|l| !l.is_empty() && *l != ".");
    match location {
        Some(location) => format!("{}/package.json", location),
        None => "package.json".to_string(),
    }
}

pub fn parse_manifest_version(manifest: &str) -> Option<String> {
    let manifest: serde_json::Value = serde_json::from_str(manifest).ok()?;
    manifest
        .get("version")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn mirror_name(repository: &str) -> String {
    let sanitized: String = repository
        .trim_end_matches(".git")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}.git", sanitized.trim_matches('_'))
}

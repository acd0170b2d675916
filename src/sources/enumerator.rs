//! Release enumerator combining the GitHub API with plain git

use crate::core::error::SyncError;
use crate::core::retry::RetryOptions;
use crate::core::traits::{CommitInfo, Release, ReleaseEnumerator};
use crate::sources::git::GitClient;
use crate::sources::github::GitHubReleases;
use async_trait::async_trait;
use std::path::PathBuf;

/// Releases from GitHub; tags, history and manifests from git
#[derive(Debug)]
pub struct RepositoryEnumerator {
    github: GitHubReleases,
    git: GitClient,
}

impl RepositoryEnumerator {
    pub fn new<P: Into<PathBuf>>(cache_root: P) -> Result<Self, SyncError> {
        Ok(Self {
            github: GitHubReleases::new()?,
            git: GitClient::new(cache_root),
        })
    }

    /// Retry policy for GitHub API calls
    pub fn with_retry(mut self, options: RetryOptions) -> Self {
        self.github = self.github.with_retry(options);
        self
    }
}

#[async_trait]
impl ReleaseEnumerator for RepositoryEnumerator {
    async fn releases(&self, repository: &str) -> Result<Vec<Release>, SyncError> {
        self.github.releases(repository).await
    }

    async fn tags(&self, repository: &str) -> Result<Vec<String>, SyncError> {
        self.git.tags(repository).await
    }

    async fn commits(
        &self,
        repository: &str,
        branch: Option<&str>,
    ) -> Result<Vec<CommitInfo>, SyncError> {
        self.git.commits(repository, branch).await
    }

    async fn version_at(
        &self,
        repository: &str,
        location: Option<&str>,
        sha: &str,
    ) -> Result<Option<String>, SyncError> {
        self.git.version_at(repository, location, sha).await
    }
}

//! Core traits and types for extension synchronization
//!
//! This module defines the seams between the orchestration engine and its
//! external collaborators: marketplace lookups, release enumeration, the
//! secondary registry and the tools used to build an extension.

use crate::core::error::SyncError;
use crate::resolution::ResolvedSource;
use crate::store::TrackedPackage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Version records
// ============================================================================

/// What a marketplace knows about the latest published version of a package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher_name: Option<String>,
}

impl VersionRecord {
    pub fn new(version: impl Into<String>, last_updated: DateTime<Utc>) -> Self {
        Self {
            version: version.into(),
            last_updated,
            install_count: None,
            publisher_name: None,
        }
    }
}

// ============================================================================
// Repository information
// ============================================================================

/// A downloadable file attached to a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub download_url: String,
}

/// A release published on the repository host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
    #[serde(default)]
    pub prerelease: bool,
}

/// A commit on the enumerated branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Marketplace lookup by package id
///
/// Absence is not an error: `Ok(None)` means the package was never
/// published on that marketplace.
#[async_trait]
pub trait VersionOracle: Send + Sync {
    /// Marketplace name used in logs
    fn name(&self) -> &str;

    async fn fetch(&self, id: &str) -> Result<Option<VersionRecord>, SyncError>;
}

/// Read-only view of a repository's releases, tags and history
#[async_trait]
pub trait ReleaseEnumerator: Send + Sync {
    /// Releases, newest first
    async fn releases(&self, repository: &str) -> Result<Vec<Release>, SyncError>;

    /// Tag names
    async fn tags(&self, repository: &str) -> Result<Vec<String>, SyncError>;

    /// Commits of `branch` (default branch when `None`), newest first
    async fn commits(
        &self,
        repository: &str,
        branch: Option<&str>,
    ) -> Result<Vec<CommitInfo>, SyncError>;

    /// Version declared by the extension manifest at `sha`
    async fn version_at(
        &self,
        repository: &str,
        location: Option<&str>,
        sha: &str,
    ) -> Result<Option<String>, SyncError>;
}

/// What gets handed to the secondary registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishTarget {
    /// A packaged extension file
    ExtensionFile { path: PathBuf, yarn: bool },
    /// A package directory to be packaged by the registry tool
    PackagePath { path: PathBuf, yarn: bool },
}

/// The registry this tool publishes into
#[async_trait]
pub trait SecondaryRegistry: Send + Sync {
    async fn create_namespace(&self, namespace: &str) -> Result<(), SyncError>;

    async fn publish(&self, id: &str, target: &PublishTarget) -> Result<(), SyncError>;
}

/// Tools used to turn a repository checkout into something publishable
#[async_trait]
pub trait BuildToolchain: Send + Sync {
    async fn download(&self, link: &str, destination: &Path) -> Result<(), SyncError>;

    async fn checkout(
        &self,
        repository: &str,
        git_ref: &str,
        destination: &Path,
    ) -> Result<(), SyncError>;

    async fn install_dependencies(&self, directory: &Path, yarn: bool) -> Result<(), SyncError>;

    async fn run_script(&self, directory: &Path, script: &str) -> Result<(), SyncError>;
}

// ============================================================================
// Publish attempts
// ============================================================================

/// Result of one publish attempt
#[derive(Debug)]
pub enum PublishOutcome {
    Skipped(String),
    Succeeded,
    AlreadyPublished,
    Failed(SyncError),
    TimedOut,
}

impl PublishOutcome {
    /// Whether the outcome must be recorded as a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::TimedOut)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped(_) => "SKIPPED",
            Self::Succeeded => "OK",
            Self::AlreadyPublished => "ALREADY_PUBLISHED",
            Self::Failed(_) => "FAILED",
            Self::TimedOut => "TIMED_OUT",
        }
    }
}

/// Runs one isolated, time-bounded publish attempt
#[async_trait]
pub trait PublishAttempt: Send + Sync {
    async fn attempt(
        &self,
        package: &TrackedPackage,
        source: &ResolvedSource,
        secondary_version: Option<&str>,
        timeout: Duration,
    ) -> PublishOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_version_record_serialization() {
        let record = VersionRecord {
            version: "1.2.0".to_string(),
            last_updated: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            install_count: Some(1200),
            publisher_name: None,
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"lastUpdated\""));
        assert!(json.contains("\"installCount\":1200"));
        assert!(!json.contains("publisherName"));
    }

    #[test]
    fn test_outcome_failure_classification() {
        assert!(PublishOutcome::TimedOut.is_failure());
        assert!(
            PublishOutcome::Failed(SyncError::Publish {
                id: "a.b".to_string(),
                message: "exit 1".to_string(),
            })
            .is_failure()
        );
        assert!(!PublishOutcome::AlreadyPublished.is_failure());
        assert!(!PublishOutcome::Succeeded.is_failure());
        assert!(!PublishOutcome::Skipped("dry run".to_string()).is_failure());
    }

    #[test]
    fn test_release_deserializes_without_assets() {
        let release: Release = serde_json::from_str(r#"{"tag_name":"v1.0.0"}"#).unwrap();

        assert_eq!(release.tag_name, "v1.0.0");
        assert!(release.assets.is_empty());
        assert!(!release.prerelease);
    }
}

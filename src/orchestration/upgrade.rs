//! Upgrade workflow - Moves pinned packages to their newest upstream release
//!
//! Repository candidates (pinned `version`, no `download`) get a new
//! `checkout`/`version` pair; download candidates (GitHub release download
//! links) get the newest packaged release. The store is rewritten wholesale
//! and restored verbatim if the rewrite fails.

use crate::core::error::SyncError;
use crate::core::traits::{ReleaseAsset, ReleaseEnumerator};
use crate::resolution::{version_from_file_name, version_from_tag};
use crate::sources::ReleaseDownload;
use crate::store::{PackageStore, StoreRewrite, TrackedPackage};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{error, info, warn};

/// Ids never upgraded automatically
pub const DEFAULT_UPGRADE_EXCLUDE: &[&str] = &[
    "file-icons.file-icons",
    "DotJoshJohnson.xml",
    "wingrunr21.vscode-ruby",
    "andreweinand.mock-debug",
    "DigitalBrainstem.javascript-ejs-support",
    "ecmel.vscode-html-css",
    "ms-vscode.atom-keybindings",
    "wmaurer.change-case",
    "jebbs.plantuml",
    "ms-vscode.hexeditor",
    "mtxr.sqltools",
    "lextudio.restructuredtext",
    "haskell.haskell",
    "miguelsolorio.fluent-icons",
    "eamodio.tsl-problem-matcher",
    "vscode-org-mode.org-mode",
    "amazonwebservices.aws-toolkit-vscode",
];

/// Default location of the failed-id log
pub const DEFAULT_FAILED_LOG: &str = "/tmp/failed-extensions.log";

/// Finds newer upstream coordinates for a package
#[async_trait]
pub trait UpgradeAdvisor: Send + Sync {
    /// Package with `checkout` and `version` moved to the newest release
    async fn upgrade_repository(
        &self,
        package: &TrackedPackage,
    ) -> Result<TrackedPackage, SyncError>;

    /// Package with `download` moved to the newest packaged release
    async fn upgrade_download(&self, package: &TrackedPackage) -> Result<TrackedPackage, SyncError>;
}

/// Advisor reading releases and tags through a [`ReleaseEnumerator`]
pub struct ReleaseAdvisor {
    enumerator: Arc<dyn ReleaseEnumerator>,
}

impl ReleaseAdvisor {
    pub fn new(enumerator: Arc<dyn ReleaseEnumerator>) -> Self {
        Self { enumerator }
    }

    /// Newest stable release tag, else the newest stable semver tag
    async fn newest_tag(
        &self,
        package: &TrackedPackage,
        repository: &str,
    ) -> Result<String, SyncError> {
        let releases = self.enumerator.releases(repository).await?;
        if let Some(release) = releases
            .iter()
            .find(|r| !r.prerelease && version_from_tag(&r.tag_name).is_some())
        {
            return Ok(release.tag_name.clone());
        }

        let tags = self.enumerator.tags(repository).await?;
        newest_semver_tag(&tags).ok_or_else(|| SyncError::Unresolvable {
            id: package.id.clone(),
        })
    }
}

#[async_trait]
impl UpgradeAdvisor for ReleaseAdvisor {
    async fn upgrade_repository(
        &self,
        package: &TrackedPackage,
    ) -> Result<TrackedPackage, SyncError> {
        let repository = package
            .repository
            .as_deref()
            .ok_or_else(|| SyncError::MissingRepository {
                id: package.id.clone(),
            })?;

        let tag = self.newest_tag(package, repository).await?;
        let version = match self
            .enumerator
            .version_at(repository, package.location.as_deref(), &tag)
            .await?
        {
            Some(version) => version,
            None => version_from_tag(&tag)
                .map(str::to_string)
                .ok_or_else(|| SyncError::InvalidVersion {
                    id: package.id.clone(),
                    version: tag.clone(),
                })?,
        };

        let mut upgraded = package.clone();
        upgraded.checkout_ref = Some(tag);
        upgraded.pinned_version = Some(version);
        Ok(upgraded)
    }

    async fn upgrade_download(
        &self,
        package: &TrackedPackage,
    ) -> Result<TrackedPackage, SyncError> {
        let link = package.download_url.as_deref().unwrap_or_default();
        let download = ReleaseDownload::parse(link).ok_or_else(|| SyncError::Download {
            id: package.id.clone(),
            message: format!("not a GitHub release download: {}", link),
        })?;

        let current = package
            .pinned_version
            .as_deref()
            .or_else(|| version_from_file_name(&download.file))
            .or_else(|| version_from_tag(&download.tag))
            .and_then(|v| semver::Version::parse(v).ok());

        let releases = self
            .enumerator
            .releases(&download.repository_url())
            .await?;
        let newest = releases
            .iter()
            .filter(|r| !r.prerelease)
            .flat_map(|r| r.assets.iter().map(move |asset| (r, asset)))
            .filter(|(_, asset)| asset.name.to_lowercase().ends_with(".vsix"))
            .filter_map(|(release, asset)| {
                let version = version_from_file_name(&asset.name)
                    .or_else(|| version_from_tag(&release.tag_name))?;
                Some((semver::Version::parse(version).ok()?, asset))
            })
            .max_by(|(a, _), (b, _)| a.cmp(b));

        let mut upgraded = package.clone();
        match newest {
            Some((version, asset)) if current.as_ref().is_none_or(|c| version > *c) => {
                apply_download(&mut upgraded, asset, &version);
            }
            _ => info!("{}: no newer release than {}", package.id, link),
        }
        Ok(upgraded)
    }
}

fn apply_download(package: &mut TrackedPackage, asset: &ReleaseAsset, version: &semver::Version) {
    package.download_url = Some(asset.download_url.clone());
    if package.pinned_version.is_some() {
        package.pinned_version = Some(version.to_string());
    }
}

fn newest_semver_tag(tags: &[String]) -> Option<String> {
    tags.iter()
        .filter_map(|tag| {
            let version = semver::Version::parse(version_from_tag(tag)?).ok()?;
            version.pre.is_empty().then_some((version, tag))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, tag)| tag.clone())
}

/// Upgrade run options
#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    /// Only ids containing this substring are considered
    pub extension_filter: Option<String>,
    pub exclude: HashSet<String>,
    pub failed_log: PathBuf,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            extension_filter: None,
            exclude: DEFAULT_UPGRADE_EXCLUDE
                .iter()
                .map(|id| id.to_string())
                .collect(),
            failed_log: PathBuf::from(DEFAULT_FAILED_LOG),
        }
    }
}

impl UpgradeOptions {
    fn selected(&self, package: &TrackedPackage) -> bool {
        !self.exclude.contains(&package.id)
            && self
                .extension_filter
                .as_deref()
                .is_none_or(|filter| package.id.contains(filter))
    }

    pub fn is_repository_candidate(&self, package: &TrackedPackage) -> bool {
        self.selected(package) && package.pinned_version.is_some() && package.download_url.is_none()
    }

    pub fn is_download_candidate(&self, package: &TrackedPackage) -> bool {
        self.selected(package)
            && package
                .download_url
                .as_deref()
                .is_some_and(|link| ReleaseDownload::parse(link).is_some())
    }
}

/// Upgrade run result
#[derive(Debug, Clone, Default)]
pub struct UpgradeReport {
    pub upgraded: Vec<String>,
    pub failed: Vec<String>,
    pub rolled_back: bool,
}

impl UpgradeReport {
    pub fn exit_code(&self) -> i32 {
        if self.rolled_back { 1 } else { 0 }
    }
}

/// Rewrites the store with upgraded packages
pub struct UpgradeWorkflow {
    advisor: Arc<dyn UpgradeAdvisor>,
}

impl UpgradeWorkflow {
    pub fn new(advisor: Arc<dyn UpgradeAdvisor>) -> Self {
        Self { advisor }
    }

    pub async fn run(
        &self,
        store: &PackageStore,
        options: &UpgradeOptions,
    ) -> Result<UpgradeReport, SyncError> {
        let mut report = UpgradeReport::default();
        let rewrite = store.begin_rewrite().await?;

        match self.rewrite(&rewrite, options, &mut report).await {
            Ok(()) => {
                if !report.failed.is_empty() {
                    error!("failed extensions: {}", report.failed.join(","));
                }
            }
            Err(e) => {
                error!("[FAIL] Could not upgrade {}: {}", store.path().display(), e);
                report.rolled_back = true;
                rewrite.rollback().await?;
            }
        }

        fs::write(&options.failed_log, report.failed.join(", "))
            .await
            .map_err(|e| SyncError::Store {
                message: format!("{}: {}", options.failed_log.display(), e),
            })?;

        Ok(report)
    }

    async fn rewrite(
        &self,
        rewrite: &StoreRewrite<'_>,
        options: &UpgradeOptions,
        report: &mut UpgradeReport,
    ) -> Result<(), SyncError> {
        let mut packages = Vec::with_capacity(rewrite.original().len());

        for original in rewrite.original() {
            let mut upgraded = if options.is_repository_candidate(original) {
                match self.advisor.upgrade_repository(original).await {
                    Ok(upgraded) => upgraded,
                    Err(e) => {
                        error!("{}: failed to upgrade repository: {}", original.id, e);
                        report.failed.push(original.id.clone());
                        original.clone()
                    }
                }
            } else if options.is_download_candidate(original) {
                match self.advisor.upgrade_download(original).await {
                    Ok(upgraded) => upgraded,
                    Err(e) => {
                        error!("{}: failed to upgrade downloads: {}", original.id, e);
                        report.failed.push(original.id.clone());
                        original.clone()
                    }
                }
            } else {
                original.clone()
            };

            if options.is_repository_candidate(original) && upgraded.download_url.is_none() {
                apply_heuristics(&mut upgraded, original);
            }

            if upgraded != *original {
                info!("{}: upgraded", original.id);
                report.upgraded.push(original.id.clone());
            }
            packages.push(upgraded);
        }

        rewrite.commit(&packages).await
    }
}

/// Clean up an upgraded repository candidate
///
/// A bumped version with no checkout publishes from the default branch, so the
/// pin is dropped. A checkout change that did not change the version is undone.
pub fn apply_heuristics(upgraded: &mut TrackedPackage, original: &TrackedPackage) {
    if upgraded.pinned_version.is_some()
        && upgraded.pinned_version != original.pinned_version
        && upgraded.checkout_ref.is_none()
    {
        upgraded.pinned_version = None;
    }
    if upgraded.checkout_ref != original.checkout_ref
        && upgraded.pinned_version == original.pinned_version
    {
        warn!(
            "{}: checkout changed without a version change, keeping {:?}",
            original.id, original.checkout_ref
        );
        upgraded.checkout_ref = original.checkout_ref.clone();
    }
}

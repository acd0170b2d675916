//! Resolution policy
//!
//! Picks the upstream artifact to publish for a package. The decision is a
//! strict priority chain: rules are evaluated in order over a snapshot of the
//! repository and the first rule producing a source wins.
//!
//! 1. release asset for the target version
//! 2. release tag for the target version
//! 3. plain tag for the target version
//! 4. latest commit, when the primary marketplace has no record or a stale one
//! 5. latest commit, when its version equals the primary version
//! 6. last commit before the primary marketplace's last update

use crate::core::error::SyncError;
use crate::core::traits::{CommitInfo, Release, ReleaseEnumerator, VersionRecord};
use crate::resolution::source::{
    ResolvedSource, SourceKind, tag_matches_version, version_from_file_name, version_from_tag,
    versions_equal,
};
use crate::sources::github::ReleaseDownload;
use crate::store::TrackedPackage;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

/// Default staleness threshold in days
pub const DEFAULT_STALENESS_DAYS: i64 = 30;

/// Everything the rules reason over
#[derive(Debug)]
struct Snapshot<'a> {
    package: &'a TrackedPackage,
    primary: Option<&'a VersionRecord>,
    target_version: Option<String>,
    releases: Vec<Release>,
    tags: Vec<String>,
    history: Option<History>,
    stale: bool,
}

/// Commit history facts, loaded only when the tag rules do not match
#[derive(Debug, Default)]
struct History {
    latest: Option<(CommitInfo, Option<String>)>,
    predecessor: Option<(CommitInfo, Option<String>)>,
}

type Rule = fn(&Snapshot<'_>) -> Option<ResolvedSource>;

const TAG_RULES: &[(&str, Rule)] = &[
    ("release asset", release_asset),
    ("release tag", release_tag),
    ("tag", generic_tag),
];

const COMMIT_RULES: &[(&str, Rule)] = &[
    ("latest commit", latest_commit),
    ("matched latest commit", matched_latest_commit),
    ("matched commit", matched_commit),
];

/// Decides which upstream artifact represents the version to publish
pub struct ResolutionPolicy {
    enumerator: Arc<dyn ReleaseEnumerator>,
    staleness: Duration,
}

impl ResolutionPolicy {
    pub fn new(enumerator: Arc<dyn ReleaseEnumerator>) -> Self {
        Self {
            enumerator,
            staleness: Duration::days(DEFAULT_STALENESS_DAYS),
        }
    }

    pub fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    /// Resolve the source to publish for `package`
    pub async fn resolve(
        &self,
        package: &TrackedPackage,
        primary: Option<&VersionRecord>,
    ) -> Result<ResolvedSource, SyncError> {
        self.resolve_at(package, primary, Utc::now()).await
    }

    /// Resolve as of `now`
    pub async fn resolve_at(
        &self,
        package: &TrackedPackage,
        primary: Option<&VersionRecord>,
        now: DateTime<Utc>,
    ) -> Result<ResolvedSource, SyncError> {
        let repository = package
            .repository
            .as_deref()
            .ok_or_else(|| SyncError::MissingRepository {
                id: package.id.clone(),
            })?;

        let target_version = package
            .pinned_version
            .clone()
            .or_else(|| primary.map(|p| p.version.clone()));

        let (releases, tags) = if target_version.is_some() {
            (
                self.enumerator.releases(repository).await?,
                self.enumerator.tags(repository).await?,
            )
        } else {
            (Vec::new(), Vec::new())
        };

        let mut snapshot = Snapshot {
            package,
            primary,
            target_version,
            releases,
            tags,
            history: None,
            stale: primary.is_none_or(|p| p.last_updated < now - self.staleness),
        };

        if let Some(resolved) = Self::first_match(TAG_RULES, &snapshot) {
            return Ok(resolved);
        }

        snapshot.history = Some(self.load_history(repository, package, primary).await?);

        Self::first_match(COMMIT_RULES, &snapshot).ok_or_else(|| SyncError::Unresolvable {
            id: package.id.clone(),
        })
    }

    fn first_match(rules: &[(&str, Rule)], snapshot: &Snapshot<'_>) -> Option<ResolvedSource> {
        rules.iter().find_map(|(name, rule)| {
            let resolved = rule(snapshot)?;
            debug!(id = %snapshot.package.id, rule = name, "resolution rule matched");
            Some(resolved)
        })
    }

    async fn load_history(
        &self,
        repository: &str,
        package: &TrackedPackage,
        primary: Option<&VersionRecord>,
    ) -> Result<History, SyncError> {
        let commits = self
            .enumerator
            .commits(repository, package.checkout_ref.as_deref())
            .await?;
        let location = package.location.as_deref();

        let Some(latest) = commits.first().cloned() else {
            return Ok(History::default());
        };
        let latest_version = self
            .enumerator
            .version_at(repository, location, &latest.sha)
            .await?;

        let predecessor = match primary {
            Some(primary) => commits
                .iter()
                .find(|c| c.timestamp <= primary.last_updated)
                .cloned(),
            None => None,
        };
        let predecessor = match predecessor {
            Some(commit) if commit.sha == latest.sha => Some((commit, latest_version.clone())),
            Some(commit) => {
                let version = self
                    .enumerator
                    .version_at(repository, location, &commit.sha)
                    .await?;
                Some((commit, version))
            }
            None => None,
        };

        Ok(History {
            latest: Some((latest, latest_version)),
            predecessor,
        })
    }
}

/// Version a release download link names, from the file name or else the tag segment
fn download_version(link: &str) -> Option<String> {
    version_from_file_name(link)
        .map(str::to_string)
        .or_else(|| {
            let download = ReleaseDownload::parse(link)?;
            version_from_tag(&download.tag).map(str::to_string)
        })
}

fn release_asset(snapshot: &Snapshot<'_>) -> Option<ResolvedSource> {
    if let Some(link) = snapshot.package.download_url.as_deref() {
        let file = link.rsplit('/').next().unwrap_or(link).to_string();
        let linked = download_version(link);
        let version = match snapshot.target_version.as_deref() {
            Some(target) => linked
                .filter(|linked| versions_equal(linked, target))
                .map(|_| target.to_string()),
            None => linked,
        };
        if let Some(version) = version {
            return Some(ResolvedSource::new(
                SourceKind::ReleaseAsset {
                    file,
                    link: link.to_string(),
                },
                version,
            ));
        }
    }

    let target = snapshot.target_version.as_deref()?;
    let name = snapshot.package.name().to_lowercase();

    snapshot
        .releases
        .iter()
        .filter(|release| tag_matches_version(&release.tag_name, target))
        .find_map(|release| {
            let vsix: Vec<_> = release
                .assets
                .iter()
                .filter(|asset| asset.name.to_lowercase().ends_with(".vsix"))
                .collect();
            let asset = vsix
                .iter()
                .find(|asset| asset.name.to_lowercase().contains(&name))
                .or_else(|| vsix.first())?;
            Some(ResolvedSource::new(
                SourceKind::ReleaseAsset {
                    file: asset.name.clone(),
                    link: asset.download_url.clone(),
                },
                target,
            ))
        })
}

fn release_tag(snapshot: &Snapshot<'_>) -> Option<ResolvedSource> {
    let target = snapshot.target_version.as_deref()?;
    snapshot
        .releases
        .iter()
        .find(|release| tag_matches_version(&release.tag_name, target))
        .map(|release| {
            ResolvedSource::new(
                SourceKind::ReleaseTag {
                    git_ref: release.tag_name.clone(),
                },
                target,
            )
        })
}

fn generic_tag(snapshot: &Snapshot<'_>) -> Option<ResolvedSource> {
    let target = snapshot.target_version.as_deref()?;
    snapshot
        .tags
        .iter()
        .find(|tag| tag_matches_version(tag, target))
        .map(|tag| {
            ResolvedSource::new(
                SourceKind::GenericTag {
                    git_ref: tag.clone(),
                },
                target,
            )
        })
}

fn latest_commit(snapshot: &Snapshot<'_>) -> Option<ResolvedSource> {
    if !snapshot.stale {
        return None;
    }
    let (commit, version) = snapshot.history.as_ref()?.latest.as_ref()?;
    let version = version
        .clone()
        .or_else(|| snapshot.target_version.clone())?;
    Some(ResolvedSource::new(
        SourceKind::LatestCommit {
            git_ref: commit.sha.clone(),
        },
        version,
    ))
}

fn matched_latest_commit(snapshot: &Snapshot<'_>) -> Option<ResolvedSource> {
    let primary = snapshot.primary?;
    let (commit, version) = snapshot.history.as_ref()?.latest.as_ref()?;
    let version = version.as_deref()?;
    if !versions_equal(version, &primary.version) {
        return None;
    }
    Some(ResolvedSource::new(
        SourceKind::MatchedLatestCommit {
            git_ref: commit.sha.clone(),
        },
        primary.version.clone(),
    ))
}

fn matched_commit(snapshot: &Snapshot<'_>) -> Option<ResolvedSource> {
    let primary = snapshot.primary?;
    let (commit, version) = snapshot.history.as_ref()?.predecessor.as_ref()?;
    Some(ResolvedSource::new(
        SourceKind::MatchedCommit {
            git_ref: commit.sha.clone(),
        },
        version.clone().unwrap_or_else(|| primary.version.clone()),
    ))
}

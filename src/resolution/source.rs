//! Resolved sources and version matching helpers

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    /// Version embedded at the end of a tag name (`v1.2.3`, `ext-1.2.3`, `release/1.2.3`)
    static ref TAG_VERSION: Regex = Regex::new(
        r"^(?:.*?[-_/@])?[vV]?(\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?)$"
    )
    .unwrap();

    /// Version embedded in a packaged extension file name (`name-1.2.3.vsix`)
    static ref FILE_VERSION: Regex = Regex::new(
        r"(?i)[-_@]v?(\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?)\.vsix$"
    )
    .unwrap();
}

/// The upstream artifact chosen for publishing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SourceKind {
    /// A packaged extension attached to a release
    ReleaseAsset { file: String, link: String },
    /// The tag of a release
    ReleaseTag {
        #[serde(rename = "ref")]
        git_ref: String,
    },
    /// A plain tag
    GenericTag {
        #[serde(rename = "ref")]
        git_ref: String,
    },
    /// The head of the enumerated branch, published without a version to chase
    LatestCommit {
        #[serde(rename = "ref")]
        git_ref: String,
    },
    /// The head of the enumerated branch, whose version matches the primary marketplace
    MatchedLatestCommit {
        #[serde(rename = "ref")]
        git_ref: String,
    },
    /// The last commit before the primary marketplace's last update
    MatchedCommit {
        #[serde(rename = "ref")]
        git_ref: String,
    },
}

/// A resolved source together with the version it is expected to publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSource {
    #[serde(flatten)]
    pub kind: SourceKind,
    pub target_version: String,
}

impl ResolvedSource {
    pub fn new(kind: SourceKind, target_version: impl Into<String>) -> Self {
        Self {
            kind,
            target_version: target_version.into(),
        }
    }

    /// Git ref to check out, for every source that is not a release asset
    pub fn git_ref(&self) -> Option<&str> {
        match &self.kind {
            SourceKind::ReleaseAsset { .. } => None,
            SourceKind::ReleaseTag { git_ref }
            | SourceKind::GenericTag { git_ref }
            | SourceKind::LatestCommit { git_ref }
            | SourceKind::MatchedLatestCommit { git_ref }
            | SourceKind::MatchedCommit { git_ref } => Some(git_ref),
        }
    }

    /// Human readable explanation of where the source came from
    pub fn describe(&self, published_upstream: bool) -> String {
        match &self.kind {
            SourceKind::ReleaseAsset { link, .. } => format!("resolved {} from release", link),
            SourceKind::ReleaseTag { git_ref } => format!("resolved {} from release tag", git_ref),
            SourceKind::GenericTag { git_ref } => format!("resolved {} from tags", git_ref),
            SourceKind::LatestCommit { git_ref } if published_upstream => format!(
                "resolved {} from the very latest commit, since it is not actively maintained",
                git_ref
            ),
            SourceKind::LatestCommit { git_ref } => format!(
                "resolved {} from the very latest commit, since it is not published to the primary marketplace",
                git_ref
            ),
            SourceKind::MatchedLatestCommit { git_ref } => {
                format!("resolved {} from the very latest commit", git_ref)
            }
            SourceKind::MatchedCommit { git_ref } => format!(
                "resolved {} from the latest commit on the last update date",
                git_ref
            ),
        }
    }
}

/// Extract the version a tag name refers to
pub fn version_from_tag(tag: &str) -> Option<&str> {
    let tag = tag.trim_start_matches("refs/tags/");
    TAG_VERSION
        .captures(tag)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

/// Extract the version from a packaged extension file name
pub fn version_from_file_name(name: &str) -> Option<&str> {
    let name = name.rsplit('/').next().unwrap_or(name);
    FILE_VERSION
        .captures(name)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

/// Semantic-version equality, falling back to string equality for non-semver strings
pub fn versions_equal(a: &str, b: &str) -> bool {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.trim_start_matches('v') == b.trim_start_matches('v'),
    }
}

/// Whether `tag` names `version`
pub fn tag_matches_version(tag: &str, version: &str) -> bool {
    version_from_tag(tag).is_some_and(|tagged| versions_equal(tagged, version))
}

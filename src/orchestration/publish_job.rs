//! Publish Job - The work done inside one isolated publish attempt
//!
//! A job receives the package and a [`PublishContext`] describing the resolved
//! source, prepares a publishable artifact in its own working directory and
//! hands it to the secondary registry. The job runs in a worker process and
//! reports its outcome through the exit code.

use crate::core::error::SyncError;
use crate::core::traits::{BuildToolchain, PublishTarget, SecondaryRegistry};
use crate::resolution::{ResolvedSource, SourceKind};
use crate::store::TrackedPackage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

pub const EXIT_PUBLISHED: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ALREADY_PUBLISHED: i32 = 3;
pub const EXIT_SKIPPED: i32 = 4;

const REPOSITORY_DIR: &str = "repository";

/// What a worker is asked to publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishContext {
    /// Version the resolved source is expected to produce
    pub version: String,
    /// Version currently on the secondary registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ovsx_version: Option<String>,
    /// Release asset file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Release asset download link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Git ref to build from
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

impl PublishContext {
    pub fn new(source: &ResolvedSource, secondary_version: Option<&str>) -> Self {
        let (file, link) = match &source.kind {
            SourceKind::ReleaseAsset { file, link } => (Some(file.clone()), Some(link.clone())),
            _ => (None, None),
        };

        Self {
            version: source.target_version.clone(),
            ovsx_version: secondary_version.map(str::to_string),
            file,
            link,
            git_ref: source.git_ref().map(str::to_string),
        }
    }
}

/// Everything a worker needs, passed as one JSON argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishJob {
    pub extension: TrackedPackage,
    pub context: PublishContext,
    /// Clean directory owned by this attempt
    pub work_dir: PathBuf,
}

/// Successful end of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Published,
    AlreadyPublished,
    Skipped(String),
}

impl JobOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            JobOutcome::Published => EXIT_PUBLISHED,
            JobOutcome::AlreadyPublished => EXIT_ALREADY_PUBLISHED,
            JobOutcome::Skipped(_) => EXIT_SKIPPED,
        }
    }
}

/// Exit code of the worker for a job result
pub fn exit_code(result: &Result<JobOutcome, SyncError>) -> i32 {
    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(_) => EXIT_FAILED,
    }
}

impl PublishJob {
    pub fn new(extension: TrackedPackage, context: PublishContext, work_dir: PathBuf) -> Self {
        Self {
            extension,
            context,
            work_dir,
        }
    }

    /// Run the job against the given registry and toolchain
    pub async fn run(
        &self,
        registry: &dyn SecondaryRegistry,
        toolchain: &dyn BuildToolchain,
    ) -> Result<JobOutcome, SyncError> {
        let id = &self.extension.id;

        if let Some(skip) = self.precheck()? {
            info!("[SKIPPED] {}", skip);
            return Ok(JobOutcome::Skipped(skip));
        }

        fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| SyncError::Publish {
                id: id.clone(),
                message: format!("failed to create {}: {}", self.work_dir.display(), e),
            })?;

        if let Err(e) = registry.create_namespace(self.extension.namespace()).await {
            warn!("Creating namespace failed, assuming that it already exists: {}", e);
        }

        let target = self.prepare(toolchain).await?;

        match registry.publish(id, &target).await {
            Ok(()) => {
                info!("[OK] Successfully published {} {}", id, self.context.version);
                Ok(JobOutcome::Published)
            }
            Err(e) if is_already_published(&e) => {
                info!("{} {} is already published", id, self.context.version);
                Ok(JobOutcome::AlreadyPublished)
            }
            Err(e) => Err(e),
        }
    }

    /// Compare the requested version with the one on the secondary registry
    fn precheck(&self) -> Result<Option<String>, SyncError> {
        let Some(current) = self.context.ovsx_version.as_deref() else {
            return Ok(None);
        };
        let id = &self.extension.id;
        let parse = |version: &str| {
            semver::Version::parse(version).map_err(|_| SyncError::InvalidVersion {
                id: id.clone(),
                version: version.to_string(),
            })
        };
        let requested = parse(&self.context.version)?;

        match parse(current)?.cmp(&requested) {
            std::cmp::Ordering::Greater => Err(SyncError::OutOfDate {
                id: id.clone(),
                current: current.to_string(),
                requested: self.context.version.clone(),
            }),
            std::cmp::Ordering::Equal => Ok(Some(format!(
                "Requested version {} is already published",
                self.context.version
            ))),
            std::cmp::Ordering::Less => Ok(None),
        }
    }

    /// Produce the artifact to hand to the registry
    async fn prepare(&self, toolchain: &dyn BuildToolchain) -> Result<PublishTarget, SyncError> {
        let id = &self.extension.id;

        if let Some(link) = self.context.link.as_deref() {
            let file = self
                .context
                .file
                .clone()
                .unwrap_or_else(|| link.rsplit('/').next().unwrap_or("extension.vsix").to_string());
            let path = self.work_dir.join(file);
            toolchain.download(link, &path).await?;
            return Ok(PublishTarget::ExtensionFile { path, yarn: false });
        }

        let Some(git_ref) = self.context.git_ref.as_deref() else {
            return Err(SyncError::Publish {
                id: id.clone(),
                message: "nothing to publish: no release asset and no ref".to_string(),
            });
        };
        let repository = self
            .extension
            .repository
            .as_deref()
            .ok_or_else(|| SyncError::MissingRepository { id: id.clone() })?;

        let repo_dir = self.work_dir.join(REPOSITORY_DIR);
        toolchain.checkout(repository, git_ref, &repo_dir).await?;

        let yarn = fs::metadata(repo_dir.join("yarn.lock")).await.is_ok();
        toolchain.install_dependencies(&repo_dir, yarn).await?;

        if let Some(script) = self.extension.prepublish_command.as_deref() {
            toolchain.run_script(&repo_dir, script).await?;
        }

        if let Some(pattern) = self.extension.extension_file_glob.as_deref() {
            if self.extension.location.is_some() {
                warn!("[WARN] Ignoring `location` property because `extensionFile` was given.");
            }
            let path = find_extension_file(&repo_dir, pattern).ok_or_else(|| {
                SyncError::Publish {
                    id: id.clone(),
                    message: format!("no file matches {}", pattern),
                }
            })?;
            return Ok(PublishTarget::ExtensionFile { path, yarn });
        }

        let location = self.extension.location.as_deref().unwrap_or(".");
        Ok(PublishTarget::PackagePath {
            path: repo_dir.join(location),
            yarn,
        })
    }
}

fn is_already_published(error: &SyncError) -> bool {
    match error {
        SyncError::AlreadyPublished { .. } => true,
        other => other.to_string().contains("is already published"),
    }
}

/// First file under `root` matching the glob `pattern`, outside `node_modules` and `.git`
pub fn find_extension_file(root: &Path, pattern: &str) -> Option<PathBuf> {
    let pattern = pattern.trim_start_matches("./");
    let full = format!("{}/{}", glob::Pattern::escape(&root.to_string_lossy()), pattern);

    let entries = match glob::glob(&full) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("invalid extension file pattern {:?}: {}", pattern, e);
            return None;
        }
    };

    let mut matches: Vec<PathBuf> = entries
        .flatten()
        .filter(|path| path.is_file())
        .filter(|path| {
            path.strip_prefix(root).is_ok_and(|relative| {
                !relative
                    .components()
                    .any(|c| c.as_os_str() == "node_modules" || c.as_os_str() == ".git")
            })
        })
        .collect();

    matches.sort();
    matches.into_iter().next()
}

//! Publish Supervisor - Runs each publish attempt in an isolated worker process
//!
//! Every attempt gets a fresh scratch directory and its own child process in
//! a new process group. The attempt is bounded by the package timeout,
//! measured from spawn; on expiry the whole process group is killed.

use crate::core::error::SyncError;
use crate::core::traits::{PublishAttempt, PublishOutcome};
use crate::orchestration::publish_job::{
    EXIT_ALREADY_PUBLISHED, EXIT_PUBLISHED, EXIT_SKIPPED, PublishContext, PublishJob,
};
use crate::resolution::ResolvedSource;
use crate::store::TrackedPackage;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Hidden CLI subcommand a worker is started with
pub const PUBLISH_JOB_COMMAND: &str = "publish-job";

/// Program and leading arguments of a worker; the job JSON is appended last
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new<P: Into<PathBuf>>(program: P, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// This executable, re-invoked with the publish-job subcommand
    pub fn current_exe() -> Result<Self, SyncError> {
        let program = std::env::current_exe()
            .map_err(|e| SyncError::Config(format!("cannot locate worker executable: {}", e)))?;
        Ok(Self::new(program, &[PUBLISH_JOB_COMMAND]))
    }
}

/// Supervises publish attempts
#[derive(Debug, Clone)]
pub struct PublishSupervisor {
    worker: WorkerCommand,
    scratch_root: PathBuf,
}

impl PublishSupervisor {
    pub fn new<P: Into<PathBuf>>(worker: WorkerCommand, scratch_root: P) -> Self {
        Self {
            worker,
            scratch_root: scratch_root.into(),
        }
    }

    /// Fresh `<scratch_root>/<id>-<uuid>` directory for one attempt
    async fn prepare_scratch(&self, id: &str) -> Result<PathBuf, SyncError> {
        let dir = self.scratch_root.join(format!("{}-{}", id, Uuid::new_v4()));
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SyncError::Publish {
                id: id.to_string(),
                message: format!("failed to create {}: {}", dir.display(), e),
            })?;
        Ok(dir)
    }

    fn spawn(&self, id: &str, job_json: &str) -> Result<Child, SyncError> {
        let mut command = Command::new(&self.worker.program);
        command
            .args(&self.worker.args)
            .arg(job_json)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        command.spawn().map_err(|e| SyncError::Publish {
            id: id.to_string(),
            message: format!("failed to start worker: {}", e),
        })
    }

    async fn run(
        &self,
        package: &TrackedPackage,
        source: &ResolvedSource,
        secondary_version: Option<&str>,
        timeout: Duration,
        work_dir: PathBuf,
    ) -> Result<PublishOutcome, SyncError> {
        let id = &package.id;
        let job = PublishJob::new(
            package.clone(),
            PublishContext::new(source, secondary_version),
            work_dir,
        );
        let job_json = serde_json::to_string(&job).map_err(|e| SyncError::Publish {
            id: id.clone(),
            message: format!("failed to serialize job: {}", e),
        })?;

        let mut child = self.spawn(id, &job_json)?;
        debug!(id = %id, pid = child.id(), "worker started");

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status.map_err(|e| SyncError::Publish {
                id: id.clone(),
                message: format!("failed to wait for worker: {}", e),
            })?,
            Err(_) => {
                terminate(&mut child).await;
                return Ok(PublishOutcome::TimedOut);
            }
        };

        Ok(match status.code() {
            Some(EXIT_PUBLISHED) => PublishOutcome::Succeeded,
            Some(EXIT_ALREADY_PUBLISHED) => PublishOutcome::AlreadyPublished,
            Some(EXIT_SKIPPED) => PublishOutcome::Skipped(format!(
                "version {} is already published",
                source.target_version
            )),
            code => PublishOutcome::Failed(SyncError::Publish {
                id: id.clone(),
                message: match code {
                    Some(code) => format!("failed with exit status: {}", code),
                    None => "worker terminated by signal".to_string(),
                },
            }),
        })
    }
}

/// Kill the worker and everything it started
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // the worker leads its own process group
        let group = format!("-{}", pid);
        match Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) if status.success() => {}
            Ok(status) => debug!("kill {} exited with {}", group, status),
            Err(e) => warn!("failed to kill process group {}: {}", group, e),
        }
    }

    if let Err(e) = child.kill().await {
        debug!("worker already gone: {}", e);
    }
}

#[async_trait]
impl PublishAttempt for PublishSupervisor {
    async fn attempt(
        &self,
        package: &TrackedPackage,
        source: &ResolvedSource,
        secondary_version: Option<&str>,
        timeout: Duration,
    ) -> PublishOutcome {
        let id = &package.id;

        let work_dir = match self.prepare_scratch(id).await {
            Ok(dir) => dir,
            Err(e) => return PublishOutcome::Failed(e),
        };

        let outcome = match self
            .run(package, source, secondary_version, timeout, work_dir.clone())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => PublishOutcome::Failed(e),
        };

        match &outcome {
            PublishOutcome::TimedOut => {
                error!("{}: timeout after {:?}, worker killed", id, timeout)
            }
            PublishOutcome::Failed(e) => error!("{}: {}", id, e),
            other => info!("{}: {}", id, other.label()),
        }

        if let Err(e) = fs::remove_dir_all(&work_dir).await {
            warn!("failed to clean {}: {}", work_dir.display(), e);
        }

        outcome
    }
}

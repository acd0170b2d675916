//! Build toolchain driving git, npm/yarn and the shell

use crate::core::error::SyncError;
use crate::core::retry::{RetryManager, RetryOptions};
use crate::core::traits::BuildToolchain;
use crate::security::SafeCommandExecutor;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// Builds extensions with the tools found on `PATH`
#[derive(Debug, Clone)]
pub struct ShellToolchain {
    client: reqwest::Client,
    retry: RetryManager,
}

impl ShellToolchain {
    pub fn new() -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5 * 60))
            .user_agent(concat!("extension-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            retry: RetryManager::new(RetryOptions::default()),
        })
    }

    /// Retry policy for asset downloads
    pub fn with_retry(mut self, options: RetryOptions) -> Self {
        self.retry = RetryManager::new(options);
        self
    }

    fn executor(directory: &Path) -> Result<SafeCommandExecutor, SyncError> {
        let mut executor = SafeCommandExecutor::new(directory)?;
        // dev dependencies are needed to package the extension
        executor.set_env("NODE_ENV", "development");
        executor.set_forward_output(true);
        Ok(executor)
    }

    async fn fetch(&self, link: &str) -> Result<Vec<u8>, SyncError> {
        let response = self
            .client
            .get(link)
            .send()
            .await
            .map_err(|e| SyncError::TransientNetwork {
                service: "download".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SyncError::TransientNetwork {
                service: "download".to_string(),
                message: format!("HTTP {} for {}", status, link),
            });
        }
        if !status.is_success() {
            return Err(SyncError::Download {
                id: link.to_string(),
                message: format!("HTTP {}", status),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::TransientNetwork {
                service: "download".to_string(),
                message: e.to_string(),
            })?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl BuildToolchain for ShellToolchain {
    async fn download(&self, link: &str, destination: &Path) -> Result<(), SyncError> {
        info!("Downloading {}", link);
        let bytes = self.retry.retry(|| self.fetch(link)).await?;

        fs::write(destination, bytes)
            .await
            .map_err(|e| SyncError::Download {
                id: link.to_string(),
                message: format!("{}: {}", destination.display(), e),
            })
    }

    async fn checkout(
        &self,
        repository: &str,
        git_ref: &str,
        destination: &Path,
    ) -> Result<(), SyncError> {
        let parent = destination.parent().unwrap_or(Path::new("."));
        let target = destination.display().to_string();

        Self::executor(parent)?
            .run(
                "git",
                &["clone", "--recurse-submodules", repository, &target],
            )
            .await?;
        Self::executor(destination)?
            .run("git", &["checkout", git_ref])
            .await?;
        // submodules follow the checked out ref
        Self::executor(destination)?
            .run("git", &["submodule", "update", "--init", "--recursive"])
            .await?;
        Ok(())
    }

    async fn install_dependencies(&self, directory: &Path, yarn: bool) -> Result<(), SyncError> {
        let tool = if yarn { "yarn" } else { "npm" };
        Self::executor(directory)?.run(tool, &["install"]).await?;
        Ok(())
    }

    async fn run_script(&self, directory: &Path, script: &str) -> Result<(), SyncError> {
        Self::executor(directory)?
            .run("sh", &["-c", script])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_script_in_directory() {
        let dir = TempDir::new().unwrap();
        let toolchain = ShellToolchain::new().unwrap();

        toolchain
            .run_script(dir.path(), "echo \"$NODE_ENV\" > built.txt")
            .await
            .unwrap();

        let built = std::fs::read_to_string(dir.path().join("built.txt")).unwrap();
        assert_eq!(built.trim(), "development");
    }

    #[tokio::test]
    async fn test_failing_script_is_command_error() {
        let dir = TempDir::new().unwrap();
        let toolchain = ShellToolchain::new().unwrap();

        let result = toolchain.run_script(dir.path(), "exit 7").await;

        assert!(matches!(result, Err(SyncError::Command { .. })));
    }

    #[tokio::test]
    async fn test_checkout_local_repository() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        std::fs::create_dir(&source).unwrap();
        std::fs::write(source.join("package.json"), r#"{"version":"0.1.0"}"#).unwrap();
        let script = "git init -q && git -c user.name=t -c user.email=t@t add . \
            && git -c user.name=t -c user.email=t@t commit -qm init && git tag v0.1.0";
        let status = std::process::Command::new("sh")
            .args(["-c", script])
            .current_dir(&source)
            .status()
            .unwrap();
        assert!(status.success());

        let destination = dir.path().join("repository");
        ShellToolchain::new()
            .unwrap()
            .checkout(&source.display().to_string(), "v0.1.0", &destination)
            .await
            .unwrap();

        assert!(destination.join("package.json").exists());
    }
}

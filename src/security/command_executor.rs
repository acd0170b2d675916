//! SafeCommandExecutor: whitelisted, time-bounded external command execution
//!
//! # Security Features
//!
//! - **Whitelist-based validation**: Only the tools needed to build and publish
//!   an extension can execute
//! - **Injection prevention**: Arguments are passed as a vector, never
//!   interpolated into a shell string (pre-publish scripts are the one
//!   explicit exception and go through `sh -c`)
//! - **Working directory validation**: Validates existence before execution
//! - **Timeout control**: A hanging command is killed when the timeout expires
//! - **Secret environment**: Tokens stay wrapped in `SecretString` until spawn
//! - **Output forwarding**: Long-running build and publish tools can have their
//!   output logged line by line while it is still captured, with secrets masked

use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Commands SafeCommandExecutor is allowed to run
const ALLOWED_COMMANDS: &[&str] = &["git", "npm", "yarn", "ovsx", "sh"];

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    /// Command is not in the allowed whitelist
    #[error("Command '{0}' is not in the allowed whitelist")]
    CommandNotAllowed(String),

    /// Working directory does not exist or is not accessible
    #[error("Working directory does not exist: {0}")]
    InvalidWorkingDirectory(PathBuf),

    /// Command could not be started (binary not found, permission denied)
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// Command ran and exited unsuccessfully
    #[error("'{command}' exited with status {code:?}: {stderr}")]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Command exceeded the timeout duration
    #[error("Command timeout after {0:?}")]
    Timeout(Duration),
}

/// Safe command executor with security controls
#[derive(Debug)]
pub struct SafeCommandExecutor {
    working_dir: PathBuf,
    timeout: Option<Duration>,
    env: Vec<(String, String)>,
    secret_env: Vec<(String, SecretString)>,
    forward_output: bool,
}

impl SafeCommandExecutor {
    /// Create an executor running commands in `working_dir`, which must exist
    pub fn new<P: AsRef<Path>>(working_dir: P) -> Result<Self, CommandError> {
        let working_dir = working_dir.as_ref().to_path_buf();

        if !working_dir.is_dir() {
            return Err(CommandError::InvalidWorkingDirectory(working_dir));
        }

        Ok(Self {
            working_dir,
            timeout: None,
            env: Vec::new(),
            secret_env: Vec::new(),
            forward_output: false,
        })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub fn set_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.env.push((name.into(), value.into()));
    }

    /// Pass a secret to every spawned command through the environment
    pub fn set_secret_env(&mut self, name: impl Into<String>, value: SecretString) {
        self.secret_env.push((name.into(), value));
    }

    /// Log every output line as it arrives instead of only on failure
    pub fn set_forward_output(&mut self, forward: bool) {
        self.forward_output = forward;
    }

    /// Execute a command and capture its output, whatever the exit status
    pub async fn execute(&self, command: &str, args: &[&str]) -> Result<Output, CommandError> {
        if !ALLOWED_COMMANDS.contains(&command) {
            return Err(CommandError::CommandNotAllowed(command.to_string()));
        }

        #[cfg(target_os = "windows")]
        let command_name = if matches!(command, "npm" | "yarn" | "ovsx") {
            format!("{}.cmd", command)
        } else {
            command.to_string()
        };

        #[cfg(not(target_os = "windows"))]
        let command_name = command.to_string();

        debug!(command, ?args, dir = %self.working_dir.display(), "executing");

        let mut cmd = Command::new(&command_name);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (name, value) in &self.env {
            cmd.env(name, value);
        }
        for (name, value) in &self.secret_env {
            cmd.env(name, value.expose_secret());
        }

        let output = self.collect_output(cmd, command);
        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, output)
                .await
                .map_err(|_| CommandError::Timeout(timeout))?,
            None => output.await,
        };

        output.map_err(|e| CommandError::ExecutionFailed(format!("{}: {}", command, e)))
    }

    async fn collect_output(&self, mut cmd: Command, command: &str) -> std::io::Result<Output> {
        if !self.forward_output {
            return cmd.output().await;
        }

        let mut child = cmd.spawn()?;
        let secrets: Vec<String> = self
            .secret_env
            .iter()
            .map(|(_, value)| value.expose_secret().to_string())
            .filter(|value| !value.is_empty())
            .collect();
        let stdout = forward_lines(child.stdout.take(), command.to_string(), secrets.clone());
        let stderr = forward_lines(child.stderr.take(), command.to_string(), secrets);

        let (status, stdout, stderr) = tokio::join!(child.wait(), stdout, stderr);
        Ok(Output {
            status: status?,
            stdout,
            stderr,
        })
    }

    /// Execute a command that must succeed; returns its stdout
    pub async fn run(&self, command: &str, args: &[&str]) -> Result<String, CommandError> {
        let output = self.execute(command, args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stderr = if stderr.is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            } else {
                stderr
            };
            return Err(CommandError::NonZeroExit {
                command: command.to_string(),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Log each line of `reader` under the command name and return everything read
async fn forward_lines<R: AsyncRead + Unpin>(
    reader: Option<R>,
    command: String,
    secrets: Vec<String>,
) -> Vec<u8> {
    let Some(reader) = reader else {
        return Vec::new();
    };

    let mut captured = Vec::new();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let shown = secrets
            .iter()
            .fold(line.clone(), |shown, secret| shown.replace(secret, "***"));
        info!("[{}] {}", command, shown);
        captured.extend_from_slice(line.as_bytes());
        captured.push(b'\n');
    }
    captured
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_rejected_command_rm() {
        let dir = TempDir::new().unwrap();
        let executor = SafeCommandExecutor::new(dir.path()).unwrap();

        let result = executor.execute("rm", &["-rf", "/"]).await;

        assert!(matches!(result, Err(CommandError::CommandNotAllowed(_))));
    }

    #[tokio::test]
    async fn test_rejected_command_cargo() {
        let dir = TempDir::new().unwrap();
        let executor = SafeCommandExecutor::new(dir.path()).unwrap();

        let result = executor.run("cargo", &["--version"]).await;

        assert!(matches!(result, Err(CommandError::CommandNotAllowed(_))));
    }

    #[test]
    fn test_invalid_working_directory() {
        let result = SafeCommandExecutor::new("/nonexistent/directory/that/does/not/exist");

        assert!(matches!(
            result,
            Err(CommandError::InvalidWorkingDirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_output_capture_runs_in_working_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let executor = SafeCommandExecutor::new(dir.path()).unwrap();

        let stdout = executor.run("sh", &["-c", "ls"]).await.unwrap();

        assert!(stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_argument_is_not_interpolated() {
        let dir = TempDir::new().unwrap();
        let executor = SafeCommandExecutor::new(dir.path()).unwrap();

        let stdout = executor
            .run("sh", &["-c", "printf '%s' \"$0\"", "a; echo injected"])
            .await
            .unwrap();

        assert_eq!(stdout, "a; echo injected");
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let dir = TempDir::new().unwrap();
        let executor = SafeCommandExecutor::new(dir.path()).unwrap();

        let result = executor.run("sh", &["-c", "echo broken >&2; exit 2"]).await;

        match result {
            Err(CommandError::NonZeroExit { code, stderr, .. }) => {
                assert_eq!(code, Some(2));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_with_timeout() {
        let dir = TempDir::new().unwrap();
        let mut executor = SafeCommandExecutor::new(dir.path()).unwrap();
        executor.set_timeout(Duration::from_millis(100));

        let result = executor.execute("sh", &["-c", "sleep 5"]).await;

        assert!(matches!(result, Err(CommandError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_forwarded_output_is_still_captured() {
        let dir = TempDir::new().unwrap();
        let mut executor = SafeCommandExecutor::new(dir.path()).unwrap();
        executor.set_forward_output(true);

        let stdout = executor
            .run("sh", &["-c", "echo one; echo two"])
            .await
            .unwrap();
        assert_eq!(stdout, "one\ntwo\n");

        let result = executor.run("sh", &["-c", "echo progress; echo broken >&2; exit 3"]).await;
        match result {
            Err(CommandError::NonZeroExit { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forwarded_output_respects_timeout() {
        let dir = TempDir::new().unwrap();
        let mut executor = SafeCommandExecutor::new(dir.path()).unwrap();
        executor.set_forward_output(true);
        executor.set_timeout(Duration::from_millis(100));

        let result = executor.execute("sh", &["-c", "echo started; sleep 5"]).await;

        assert!(matches!(result, Err(CommandError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_secret_env_is_passed() {
        let dir = TempDir::new().unwrap();
        let mut executor = SafeCommandExecutor::new(dir.path()).unwrap();
        executor.set_secret_env("SYNC_TEST_SECRET", SecretString::new("s3cr3t".into()));

        let stdout = executor
            .run("sh", &["-c", "printf '%s' \"$SYNC_TEST_SECRET\""])
            .await
            .unwrap();

        assert_eq!(stdout, "s3cr3t");
    }
}

//! Secondary registry adapter driving the `ovsx` command line tool

use crate::core::error::SyncError;
use crate::core::traits::{PublishTarget, SecondaryRegistry};
use crate::security::{CommandError, SafeCommandExecutor, SecureTokenManager, token_manager::OVSX_SERVICE};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use tracing::info;

const ALREADY_PUBLISHED_MARKER: &str = "is already published";

/// Publishes through `ovsx`, authenticating with `OVSX_PAT`
#[derive(Debug)]
pub struct OvsxCli {
    working_dir: PathBuf,
    registry_url: Option<String>,
    token: Option<SecretString>,
    tokens: SecureTokenManager,
}

impl OvsxCli {
    pub fn new<P: Into<PathBuf>>(working_dir: P) -> Self {
        let tokens = SecureTokenManager::new();
        Self {
            working_dir: working_dir.into(),
            registry_url: None,
            token: tokens.get_token(OVSX_SERVICE),
            tokens,
        }
    }

    /// Publish to a registry other than the tool's default
    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = Some(url.into());
        self
    }

    fn executor(&self) -> Result<SafeCommandExecutor, CommandError> {
        let mut executor = SafeCommandExecutor::new(&self.working_dir)?;
        if let Some(token) = &self.token {
            executor.set_secret_env("OVSX_PAT", SecretString::new(token.expose_secret().into()));
        }
        executor.set_forward_output(true);
        Ok(executor)
    }

    fn registry_args(&self) -> Vec<String> {
        match &self.registry_url {
            Some(url) => vec!["--registryUrl".to_string(), url.clone()],
            None => Vec::new(),
        }
    }

    async fn run(&self, args: Vec<String>) -> Result<String, CommandError> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.executor()?.run("ovsx", &args).await
    }
}

/// Arguments of `ovsx publish` for `target`
fn publish_args(target: &PublishTarget) -> Vec<String> {
    let (mut args, yarn) = match target {
        PublishTarget::ExtensionFile { path, yarn } => (
            vec!["publish".to_string(), path.display().to_string()],
            *yarn,
        ),
        PublishTarget::PackagePath { path, yarn } => (
            vec![
                "publish".to_string(),
                "--packagePath".to_string(),
                path.display().to_string(),
            ],
            *yarn,
        ),
    };
    if yarn {
        args.push("--yarn".to_string());
    }
    args
}

#[async_trait]
impl SecondaryRegistry for OvsxCli {
    async fn create_namespace(&self, namespace: &str) -> Result<(), SyncError> {
        let mut args = vec!["create-namespace".to_string(), namespace.to_string()];
        args.extend(self.registry_args());

        self.run(args)
            .await
            .map(|_| ())
            .map_err(|e| SyncError::NamespaceCreate {
                namespace: namespace.to_string(),
                message: self.tokens.mask_tokens_in_string(&e.to_string()),
            })
    }

    async fn publish(&self, id: &str, target: &PublishTarget) -> Result<(), SyncError> {
        let mut args = publish_args(target);
        args.extend(self.registry_args());

        info!("Attempting to publish {} to the secondary registry", id);
        match self.run(args).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let message = self.tokens.mask_tokens_in_string(&e.to_string());
                if message.contains(ALREADY_PUBLISHED_MARKER) {
                    Err(SyncError::AlreadyPublished {
                        id: id.to_string(),
                        version: String::new(),
                    })
                } else {
                    Err(SyncError::Publish {
                        id: id.to_string(),
                        message,
                    })
                }
            }
        }
    }
}

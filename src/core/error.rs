//! Error handling for extension synchronization
//!
//! This module provides the error taxonomy shared by the resolution policy,
//! the publish supervisor and the batch driver, with recovery guidance
//! using the thiserror crate for ergonomic error handling.

use thiserror::Error;

/// Main error type for synchronization operations
#[derive(Error, Debug)]
pub enum SyncError {
    // Resolution errors
    #[error("[{id}] repository not specified")]
    MissingRepository { id: String },

    #[error("[{id}] failed to resolve a publishable source")]
    Unresolvable { id: String },

    #[error("[{id}] invalid version: {version}")]
    InvalidVersion { id: String, version: String },

    // Publishing errors
    #[error("[{namespace}] creating namespace failed: {message}")]
    NamespaceCreate { namespace: String, message: String },

    #[error("[{id}] version {version} is already published")]
    AlreadyPublished { id: String, version: String },

    #[error(
        "[{id}] store is out of date: secondary version {current} is already greater than requested version {requested}"
    )]
    OutOfDate {
        id: String,
        current: String,
        requested: String,
    },

    #[error("[{id}] timeout after {minutes} mins")]
    Timeout { id: String, minutes: u64 },

    #[error("[{id}] publish failed: {message}")]
    Publish { id: String, message: String },

    #[error("[{id}] download failed: {message}")]
    Download { id: String, message: String },

    // Network errors
    #[error("[{service}] network error: {message}")]
    TransientNetwork { service: String, message: String },

    #[error("[{service}] remote query failed: {message}")]
    Remote { service: String, message: String },

    // Store and configuration errors
    #[error("package store error: {message}")]
    Store { message: String },

    #[error("configuration error: {0}")]
    Config(String),

    // Command execution errors
    #[error("command error: {message}")]
    Command { message: String },
}

impl SyncError {
    /// Get the package id associated with this error, if any
    pub fn package_id(&self) -> Option<&str> {
        match self {
            Self::MissingRepository { id }
            | Self::Unresolvable { id }
            | Self::InvalidVersion { id, .. }
            | Self::AlreadyPublished { id, .. }
            | Self::OutOfDate { id, .. }
            | Self::Timeout { id, .. }
            | Self::Publish { id, .. }
            | Self::Download { id, .. } => Some(id),
            Self::NamespaceCreate { .. }
            | Self::TransientNetwork { .. }
            | Self::Remote { .. }
            | Self::Store { .. }
            | Self::Config(_)
            | Self::Command { .. } => None,
        }
    }

    /// Check if this error is worth retrying at the network boundary
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. })
    }

    /// Get suggested actions for this error
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            Self::MissingRepository { .. } => {
                vec!["Add a `repository` entry for the extension to the store"]
            }
            Self::Unresolvable { .. } => vec![
                "Check that the repository has releases, tags or commits",
                "Pin a `version` and `checkout` in the store",
            ],
            Self::InvalidVersion { .. } => {
                vec!["Check the version string published on the marketplace"]
            }
            Self::NamespaceCreate { .. } => {
                vec!["Usually harmless: the namespace most likely exists already"]
            }
            Self::AlreadyPublished { .. } => vec!["Nothing to do"],
            Self::OutOfDate { .. } => vec![
                "Update the pinned `version` in the store",
                "Run the upgrade workflow",
            ],
            Self::Timeout { .. } => vec![
                "Increase the `timeout` of the extension in the store",
                "Check whether the build hangs waiting for input",
            ],
            Self::Publish { .. } => vec![
                "Check the publish output above",
                "Re-run with FAILED_EXTENSIONS set to retry only failed extensions",
            ],
            Self::Download { .. } => vec!["Check that the release asset link is reachable"],
            Self::TransientNetwork { .. } => vec![
                "Check the internet connection",
                "Wait a while and retry",
            ],
            Self::Remote { .. } => vec!["Check the marketplace URLs in the configuration and the repository URL in the store"],
            Self::Store { .. } => vec!["Check that the store file is valid JSON"],
            Self::Config(_) => vec!["Run `extension-sync check` to validate the configuration"],
            Self::Command { .. } => vec![
                "Check the command output",
                "Make sure git, npm, yarn and ovsx are installed",
            ],
        }
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingRepository { .. } => "MISSING_REPOSITORY",
            Self::Unresolvable { .. } => "UNRESOLVABLE",
            Self::InvalidVersion { .. } => "INVALID_VERSION",
            Self::NamespaceCreate { .. } => "NAMESPACE_CREATE",
            Self::AlreadyPublished { .. } => "ALREADY_PUBLISHED",
            Self::OutOfDate { .. } => "OUT_OF_DATE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Publish { .. } => "PUBLISH_ERROR",
            Self::Download { .. } => "DOWNLOAD_ERROR",
            Self::TransientNetwork { .. } => "TRANSIENT_NETWORK",
            Self::Remote { .. } => "REMOTE_ERROR",
            Self::Store { .. } => "STORE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Command { .. } => "COMMAND_ERROR",
        }
    }
}

impl From<crate::security::CommandError> for SyncError {
    fn from(error: crate::security::CommandError) -> Self {
        Self::Command {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_repository_error() {
        let error = SyncError::MissingRepository {
            id: "redhat.java".to_string(),
        };

        assert_eq!(error.package_id(), Some("redhat.java"));
        assert!(!error.is_transient());
        assert_eq!(error.code(), "MISSING_REPOSITORY");
        assert!(!error.suggested_actions().is_empty());
        assert_eq!(error.to_string(), "[redhat.java] repository not specified");
    }

    #[test]
    fn test_unresolvable_names_package() {
        let error = SyncError::Unresolvable {
            id: "vscodevim.vim".to_string(),
        };

        assert!(error.to_string().contains("vscodevim.vim"));
        assert_eq!(error.code(), "UNRESOLVABLE");
    }

    #[test]
    fn test_transient_network_is_only_transient_error() {
        let network = SyncError::TransientNetwork {
            service: "open-vsx".to_string(),
            message: "connection reset".to_string(),
        };
        let publish = SyncError::Publish {
            id: "a.b".to_string(),
            message: "boom".to_string(),
        };

        assert!(network.is_transient());
        assert!(network.package_id().is_none());
        assert!(!publish.is_transient());
    }

    #[test]
    fn test_timeout_error_message() {
        let error = SyncError::Timeout {
            id: "ms-python.python".to_string(),
            minutes: 5,
        };

        assert_eq!(error.to_string(), "[ms-python.python] timeout after 5 mins");
        assert_eq!(error.code(), "TIMEOUT");
    }

    #[test]
    fn test_out_of_date_error() {
        let error = SyncError::OutOfDate {
            id: "a.b".to_string(),
            current: "1.1.0".to_string(),
            requested: "1.0.0".to_string(),
        };

        let message = error.to_string();
        assert!(message.contains("1.1.0"));
        assert!(message.contains("1.0.0"));
        assert!(
            error
                .suggested_actions()
                .iter()
                .any(|a| a.contains("upgrade"))
        );
    }

    #[test]
    fn test_command_error_conversion() {
        let error: SyncError =
            crate::security::CommandError::CommandNotAllowed("rm".to_string()).into();

        assert_eq!(error.code(), "COMMAND_ERROR");
        assert!(error.to_string().contains("rm"));
    }
}

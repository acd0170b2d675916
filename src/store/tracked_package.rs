//! Tracked package model
//!
//! Field names on disk follow the store document (`prepublish`, `version`,
//! `checkout`, `extensionFile`, `download`, `timeout`).

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Default publish timeout in minutes
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 5;

/// An extension tracked for synchronization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedPackage {
    /// `namespace.name`
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Subpath of the extension within the repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(
        rename = "prepublish",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub prepublish_command: Option<String>,

    #[serde(rename = "version", default, skip_serializing_if = "Option::is_none")]
    pub pinned_version: Option<String>,

    #[serde(rename = "checkout", default, skip_serializing_if = "Option::is_none")]
    pub checkout_ref: Option<String>,

    #[serde(
        rename = "extensionFile",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub extension_file_glob: Option<String>,

    #[serde(rename = "download", default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,

    #[serde(
        rename = "timeout",
        default,
        deserialize_with = "deserialize_timeout",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_minutes: Option<u64>,
}

impl TrackedPackage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            repository: None,
            location: None,
            prepublish_command: None,
            pinned_version: None,
            checkout_ref: None,
            extension_file_glob: None,
            download_url: None,
            timeout_minutes: None,
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    /// Namespace part of the id (everything before the first dot)
    pub fn namespace(&self) -> &str {
        self.id.split('.').next().unwrap_or(&self.id)
    }

    /// Name part of the id (everything after the first dot)
    pub fn name(&self) -> &str {
        self.id
            .split_once('.')
            .map(|(_, name)| name)
            .unwrap_or(&self.id)
    }

    /// Timeout in minutes, `default_minutes` when the entry sets none
    pub fn timeout_minutes_or(&self, default_minutes: u64) -> u64 {
        self.timeout_minutes.unwrap_or(default_minutes)
    }

    /// Publish timeout, saturating for absurdly large entries
    pub fn timeout(&self, default_minutes: u64) -> Duration {
        Duration::from_secs(self.timeout_minutes_or(default_minutes).saturating_mul(60))
    }
}

/// Accepts integers and integer strings; anything else means "use the default"
fn deserialize_timeout<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_and_name() {
        let package = TrackedPackage::new("ms-python.python.extra");

        assert_eq!(package.namespace(), "ms-python");
        assert_eq!(package.name(), "python.extra");
    }

    #[test]
    fn test_document_field_names() {
        let json = r#"{
            "id": "vscodevim.vim",
            "repository": "https://github.com/VSCodeVim/Vim",
            "prepublish": "npm run build",
            "version": "1.21.0",
            "checkout": "v1.21.0",
            "extensionFile": "*.vsix",
            "timeout": 10
        }"#;

        let package: TrackedPackage = serde_json::from_str(json).unwrap();

        assert_eq!(package.prepublish_command.as_deref(), Some("npm run build"));
        assert_eq!(package.pinned_version.as_deref(), Some("1.21.0"));
        assert_eq!(package.checkout_ref.as_deref(), Some("v1.21.0"));
        assert_eq!(package.extension_file_glob.as_deref(), Some("*.vsix"));
        assert_eq!(package.timeout_minutes_or(DEFAULT_TIMEOUT_MINUTES), 10);
    }

    #[test]
    fn test_timeout_fallbacks() {
        let as_string: TrackedPackage =
            serde_json::from_str(r#"{"id":"a.b","timeout":"15"}"#).unwrap();
        let not_integer: TrackedPackage =
            serde_json::from_str(r#"{"id":"a.b","timeout":2.5}"#).unwrap();
        let garbage: TrackedPackage =
            serde_json::from_str(r#"{"id":"a.b","timeout":"soon"}"#).unwrap();
        let missing: TrackedPackage = serde_json::from_str(r#"{"id":"a.b"}"#).unwrap();

        assert_eq!(as_string.timeout_minutes_or(DEFAULT_TIMEOUT_MINUTES), 15);
        assert_eq!(not_integer.timeout_minutes_or(DEFAULT_TIMEOUT_MINUTES), DEFAULT_TIMEOUT_MINUTES);
        assert_eq!(garbage.timeout_minutes_or(DEFAULT_TIMEOUT_MINUTES), DEFAULT_TIMEOUT_MINUTES);
        assert_eq!(missing.timeout_minutes_or(DEFAULT_TIMEOUT_MINUTES), DEFAULT_TIMEOUT_MINUTES);
    }

    #[test]
    fn test_timeout_duration() {
        let mut package = TrackedPackage::new("a.b");
        assert_eq!(package.timeout(7), Duration::from_secs(7 * 60));

        package.timeout_minutes = Some(2);
        assert_eq!(package.timeout(7), Duration::from_secs(120));

        package.timeout_minutes = Some(u64::MAX / 2);
        assert_eq!(package.timeout(7), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_serialization_skips_unset_fields() {
        let package = TrackedPackage::new("a.b").with_repository("https://github.com/a/b");

        let json = serde_json::to_string(&package).unwrap();

        assert_eq!(json, r#"{"id":"a.b","repository":"https://github.com/a/b"}"#);
    }
}

//! Configuration structures and types for extension-sync
//!
//! This module provides type-safe configuration management with serde support.
//! Every section is optional; unset fields fall back to the built-in defaults
//! through the resolving accessors on [`SyncConfig`].

use crate::core::retry::RetryOptions;
use crate::marketplace::{PRIMARY_GALLERY_URL, SECONDARY_GALLERY_URL};
use crate::orchestration::batch_driver::BatchOptions;
use crate::orchestration::ledger::{
    DEFAULT_HIT_WINDOW_DAYS, DEFAULT_KNOWN_PUBLISHERS, DEFAULT_RECENT_WINDOW_DAYS, LedgerPolicy,
};
use crate::orchestration::upgrade::{DEFAULT_FAILED_LOG, DEFAULT_UPGRADE_EXCLUDE, UpgradeOptions};
use crate::resolution::DEFAULT_STALENESS_DAYS;
use crate::store::{DEFAULT_TIMEOUT_MINUTES, STORE_FILENAME};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Current configuration schema version
pub const CONFIG_VERSION: &str = "1.0";

/// Default location of the run report
pub const DEFAULT_REPORT_PATH: &str = "/tmp/stat.json";

/// Root configuration object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Schema version
    #[serde(default = "default_version")]
    pub version: String,

    /// Extend from base configuration file (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub marketplaces: Option<MarketplacesConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<UpgradeConfig>,
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            extends: None,
            store: None,
            marketplaces: None,
            policy: None,
            publish: None,
            report: None,
            retry: None,
            upgrade: None,
        }
    }
}

/// Tracked-package store location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Marketplace endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MarketplacesConfig {
    /// Gallery API of the primary marketplace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_url: Option<String>,

    /// Gallery API of the secondary registry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_url: Option<String>,

    /// Registry URL passed to the publishing CLI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,
}

/// Resolution and classification thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staleness_days: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_window_days: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_window_days: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_publishers: Option<Vec<String>>,
}

/// Batch publish options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PublishConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Default per-package timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,

    /// Parent of the per-attempt scratch directories
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_root: Option<String>,

    /// Re-verification filter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only: Option<Vec<String>>,
}

/// Run report location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReportConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Network retry settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

/// Upgrade workflow settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeConfig {
    /// Ids never upgraded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_log: Option<String>,
}

impl SyncConfig {
    pub fn store_path(&self) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|s| s.path.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(STORE_FILENAME))
    }

    pub fn primary_url(&self) -> String {
        self.marketplaces
            .as_ref()
            .and_then(|m| m.primary_url.clone())
            .unwrap_or_else(|| PRIMARY_GALLERY_URL.to_string())
    }

    pub fn secondary_url(&self) -> String {
        self.marketplaces
            .as_ref()
            .and_then(|m| m.secondary_url.clone())
            .unwrap_or_else(|| SECONDARY_GALLERY_URL.to_string())
    }

    pub fn registry_url(&self) -> Option<String> {
        self.marketplaces
            .as_ref()
            .and_then(|m| m.registry_url.clone())
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::days(
            self.policy
                .as_ref()
                .and_then(|p| p.staleness_days)
                .unwrap_or(DEFAULT_STALENESS_DAYS),
        )
    }

    pub fn hit_window_days(&self) -> f64 {
        self.policy
            .as_ref()
            .and_then(|p| p.hit_window_days)
            .unwrap_or(DEFAULT_HIT_WINDOW_DAYS)
    }

    pub fn recent_window_days(&self) -> i64 {
        self.policy
            .as_ref()
            .and_then(|p| p.recent_window_days)
            .unwrap_or(DEFAULT_RECENT_WINDOW_DAYS)
    }

    pub fn known_publishers(&self) -> Vec<String> {
        self.policy
            .as_ref()
            .and_then(|p| p.known_publishers.clone())
            .unwrap_or_else(|| {
                DEFAULT_KNOWN_PUBLISHERS
                    .iter()
                    .map(|p| p.to_string())
                    .collect()
            })
    }

    pub fn ledger_policy(&self) -> LedgerPolicy {
        LedgerPolicy {
            known_publishers: self.known_publishers().into_iter().collect(),
            hit_window_days: self.hit_window_days(),
            recent_window: chrono::Duration::days(self.recent_window_days()),
        }
    }

    pub fn batch_options(&self) -> BatchOptions {
        let publish = self.publish.clone().unwrap_or_default();
        BatchOptions {
            dry_run: publish.dry_run.unwrap_or(false),
            only: publish
                .only
                .filter(|ids| !ids.is_empty())
                .map(|ids| ids.into_iter().collect::<HashSet<_>>()),
            max_concurrency: publish.concurrency.unwrap_or(1),
            default_timeout_minutes: publish.timeout_minutes.unwrap_or(DEFAULT_TIMEOUT_MINUTES),
        }
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.publish
            .as_ref()
            .and_then(|p| p.scratch_root.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("extension-sync"))
    }

    pub fn report_path(&self) -> PathBuf {
        self.report
            .as_ref()
            .and_then(|r| r.path.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_PATH))
    }

    pub fn retry_options(&self) -> RetryOptions {
        let defaults = RetryOptions::default();
        let retry = self.retry.clone().unwrap_or_default();
        RetryOptions {
            max_attempts: retry.max_attempts.unwrap_or(defaults.max_attempts),
            initial_delay: retry
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            ..defaults
        }
    }

    pub fn upgrade_options(&self, extension_filter: Option<String>) -> UpgradeOptions {
        let upgrade = self.upgrade.clone().unwrap_or_default();
        UpgradeOptions {
            extension_filter,
            exclude: upgrade
                .exclude
                .unwrap_or_else(|| {
                    DEFAULT_UPGRADE_EXCLUDE
                        .iter()
                        .map(|id| id.to_string())
                        .collect()
                })
                .into_iter()
                .collect(),
            failed_log: PathBuf::from(
                upgrade
                    .failed_log
                    .unwrap_or_else(|| DEFAULT_FAILED_LOG.to_string()),
            ),
        }
    }
}

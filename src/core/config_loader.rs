//! Configuration file loader for extension-sync
//!
//! This module provides configuration loading, validation, and merging capabilities.

use super::config::*;
use crate::core::error::SyncError;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// Configuration file name
pub const CONFIG_FILENAME: &str = ".extension-sync.yaml";

lazy_static! {
    /// Environment variable reference (${VAR_NAME})
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

/// Configuration load options
#[derive(Debug, Clone)]
pub struct ConfigLoadOptions {
    /// Project path to load config from
    pub project_path: PathBuf,

    /// CLI arguments (highest priority)
    pub cli_args: Option<SyncConfig>,

    /// Environment variables
    pub env: HashMap<String, String>,

    /// Directory holding the global config (the home directory when unset)
    pub global_dir: Option<PathBuf>,
}

impl ConfigLoadOptions {
    /// Load from `project_path` with the process environment
    pub fn new<P: Into<PathBuf>>(project_path: P) -> Self {
        Self {
            project_path: project_path.into(),
            cli_args: None,
            env: env::vars().collect(),
            global_dir: env::var_os("HOME").map(PathBuf::from),
        }
    }
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationResult {
    /// Is configuration valid?
    pub valid: bool,

    /// Validation errors
    pub errors: Vec<ConfigValidationError>,

    /// Validation warnings
    pub warnings: Vec<ConfigValidationWarning>,
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    /// Field path (e.g., "publish.concurrency")
    pub field: String,

    /// Error message
    pub message: String,

    /// Expected type/value
    pub expected: Option<String>,

    /// Actual type/value
    pub actual: Option<String>,
}

/// Configuration validation warning
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationWarning {
    /// Field path
    pub field: String,

    /// Warning message
    pub message: String,

    /// Suggestion
    pub suggestion: Option<String>,
}

/// Configuration file loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from multiple sources with priority
    ///
    /// Priority (high to low):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. Project config (./.extension-sync.yaml)
    /// 4. Global config (~/.extension-sync.yaml)
    /// 5. Default values
    pub async fn load(options: ConfigLoadOptions) -> Result<SyncConfig, SyncError> {
        let mut configs: Vec<SyncConfig> = Vec::new();

        // 5. Default values (lowest priority)
        configs.push(SyncConfig::default());

        // 4. Global config
        if let Some(global_dir) = &options.global_dir
            && let Some(global_config) =
                Self::load_config_file(&global_dir.join(CONFIG_FILENAME)).await?
        {
            configs.push(global_config);
        }

        // 3. Project config
        if let Some(project_config) =
            Self::load_config_file(&options.project_path.join(CONFIG_FILENAME)).await?
        {
            configs.push(project_config);
        }

        // 2. Environment variables
        if let Some(env_config) = Self::load_env_config(&options.env) {
            configs.push(env_config);
        }

        // 1. CLI arguments (highest priority)
        if let Some(cli_config) = options.cli_args {
            configs.push(cli_config);
        }

        let merged_config = Self::merge_configs(configs);

        Ok(Self::expand_env_vars(merged_config, &options.env))
    }

    /// Load configuration from YAML file
    fn load_config_file(
        file_path: &Path,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Option<SyncConfig>, SyncError>> + Send + '_>,
    > {
        Box::pin(async move {
            if !file_path.exists() {
                return Ok(None);
            }

            let content = fs::read_to_string(file_path).await.map_err(|e| {
                SyncError::Config(format!(
                    "Failed to read config file {}: {}",
                    file_path.display(),
                    e
                ))
            })?;

            let config: SyncConfig = serde_yaml::from_str(&content).map_err(|e| {
                SyncError::Config(format!(
                    "Failed to parse YAML config {}: {}",
                    file_path.display(),
                    e
                ))
            })?;

            // Handle extends if present
            if let Some(extends_path) = &config.extends {
                let base_path = file_path
                    .parent()
                    .ok_or_else(|| SyncError::Config("Invalid config file path".to_string()))?
                    .join(extends_path);

                if let Some(base_config) = Self::load_config_file(&base_path).await? {
                    return Ok(Some(Self::merge_configs(vec![base_config, config])));
                }
            }

            Ok(Some(config))
        })
    }

    /// Load configuration from environment variables
    fn load_env_config(env: &HashMap<String, String>) -> Option<SyncConfig> {
        let mut config = SyncConfig::default();
        let mut publish = PublishConfig::default();
        let mut has_changes = false;

        // FAILED_EXTENSIONS -> publish.only
        if let Some(failed) = env.get("FAILED_EXTENSIONS") {
            let ids: Vec<String> = failed
                .split(',')
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect();
            if !ids.is_empty() {
                publish.only = Some(ids);
                has_changes = true;
            }
        }

        // DRY_RUN -> publish.dryRun
        if env.get("DRY_RUN").is_some_and(|v| !v.is_empty()) {
            publish.dry_run = Some(true);
            has_changes = true;
        }

        // EXTENSION_SYNC_CONCURRENCY -> publish.concurrency
        if let Some(concurrency) = env.get("EXTENSION_SYNC_CONCURRENCY") {
            match concurrency.trim().parse::<usize>() {
                Ok(value) => {
                    publish.concurrency = Some(value);
                    has_changes = true;
                }
                Err(_) => warn!(
                    "EXTENSION_SYNC_CONCURRENCY is not a number: {}, ignoring",
                    concurrency
                ),
            }
        }

        // EXTENSION_SYNC_STORE -> store.path
        if let Some(store) = env.get("EXTENSION_SYNC_STORE") {
            config.store = Some(StoreConfig {
                path: Some(store.clone()),
            });
            has_changes = true;
        }

        if publish != PublishConfig::default() {
            config.publish = Some(publish);
        }

        if has_changes { Some(config) } else { None }
    }

    /// Merge multiple configurations with priority
    fn merge_configs(configs: Vec<SyncConfig>) -> SyncConfig {
        let mut result = SyncConfig::default();

        for config in configs {
            Self::merge_into(&mut result, config);
        }

        result
    }

    /// Merge source config into target, field by field
    fn merge_into(target: &mut SyncConfig, source: SyncConfig) {
        if !source.version.is_empty() {
            target.version = source.version;
        }

        if source.extends.is_some() {
            target.extends = source.extends;
        }

        if let Some(store) = source.store {
            let current = target.store.take().unwrap_or_default();
            target.store = Some(StoreConfig {
                path: store.path.or(current.path),
            });
        }

        if let Some(marketplaces) = source.marketplaces {
            let current = target.marketplaces.take().unwrap_or_default();
            target.marketplaces = Some(MarketplacesConfig {
                primary_url: marketplaces.primary_url.or(current.primary_url),
                secondary_url: marketplaces.secondary_url.or(current.secondary_url),
                registry_url: marketplaces.registry_url.or(current.registry_url),
            });
        }

        if let Some(policy) = source.policy {
            let current = target.policy.take().unwrap_or_default();
            target.policy = Some(PolicyConfig {
                staleness_days: policy.staleness_days.or(current.staleness_days),
                hit_window_days: policy.hit_window_days.or(current.hit_window_days),
                recent_window_days: policy.recent_window_days.or(current.recent_window_days),
                known_publishers: policy.known_publishers.or(current.known_publishers),
            });
        }

        if let Some(publish) = source.publish {
            let current = target.publish.take().unwrap_or_default();
            target.publish = Some(PublishConfig {
                dry_run: publish.dry_run.or(current.dry_run),
                concurrency: publish.concurrency.or(current.concurrency),
                timeout_minutes: publish.timeout_minutes.or(current.timeout_minutes),
                scratch_root: publish.scratch_root.or(current.scratch_root),
                only: publish.only.or(current.only),
            });
        }

        if let Some(report) = source.report {
            let current = target.report.take().unwrap_or_default();
            target.report = Some(ReportConfig {
                path: report.path.or(current.path),
            });
        }

        if let Some(retry) = source.retry {
            let current = target.retry.take().unwrap_or_default();
            target.retry = Some(RetryConfig {
                max_attempts: retry.max_attempts.or(current.max_attempts),
                initial_delay_ms: retry.initial_delay_ms.or(current.initial_delay_ms),
                max_delay_ms: retry.max_delay_ms.or(current.max_delay_ms),
            });
        }

        if let Some(upgrade) = source.upgrade {
            let current = target.upgrade.take().unwrap_or_default();
            target.upgrade = Some(UpgradeConfig {
                exclude: upgrade.exclude.or(current.exclude),
                failed_log: upgrade.failed_log.or(current.failed_log),
            });
        }
    }

    /// Expand environment variables in marketplace URLs
    fn expand_env_vars(mut config: SyncConfig, env: &HashMap<String, String>) -> SyncConfig {
        if let Some(marketplaces) = &mut config.marketplaces {
            for url in [
                &mut marketplaces.primary_url,
                &mut marketplaces.secondary_url,
                &mut marketplaces.registry_url,
            ]
            .into_iter()
            .flatten()
            {
                *url = Self::expand_string(url, env);
            }
        }

        config
    }

    /// Expand environment variables in a single string
    ///
    /// Unknown variables are left as written.
    fn expand_string(input: &str, env: &HashMap<String, String>) -> String {
        ENV_VAR
            .replace_all(input, |captures: &regex::Captures<'_>| {
                let name = &captures[1];
                match env.get(name) {
                    Some(value) => value.clone(),
                    None => {
                        warn!("Environment variable {} not found", name);
                        captures[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    /// Validate configuration
    pub fn validate(config: &SyncConfig) -> ConfigValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Check version
        if config.version.is_empty() {
            errors.push(ConfigValidationError {
                field: "version".to_string(),
                message: "Version is required".to_string(),
                expected: Some(format!("string (e.g., \"{}\")", CONFIG_VERSION)),
                actual: Some("empty".to_string()),
            });
        } else if config.version != CONFIG_VERSION {
            warnings.push(ConfigValidationWarning {
                field: "version".to_string(),
                message: format!("Unknown version: {}", config.version),
                suggestion: Some(format!(
                    "Currently supported version is \"{}\" only",
                    CONFIG_VERSION
                )),
            });
        }

        // 2. Validate policy thresholds
        if let Some(policy) = &config.policy {
            Self::validate_policy(policy, &mut errors, &mut warnings);
        }
        if config.hit_window_days() > config.recent_window_days() as f64 {
            errors.push(ConfigValidationError {
                field: "policy.hitWindowDays".to_string(),
                message: "hit window must fit inside the recent window".to_string(),
                expected: Some(format!("<= {} days", config.recent_window_days())),
                actual: Some(format!("{} days", config.hit_window_days())),
            });
        }

        // 3. Validate publish options
        if let Some(publish) = &config.publish {
            Self::validate_publish_options(publish, &mut errors, &mut warnings);
        }

        ConfigValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    fn validate_policy(
        policy: &PolicyConfig,
        errors: &mut Vec<ConfigValidationError>,
        warnings: &mut Vec<ConfigValidationWarning>,
    ) {
        if let Some(days) = policy.staleness_days
            && days <= 0
        {
            errors.push(ConfigValidationError {
                field: "policy.stalenessDays".to_string(),
                message: "staleness threshold must be positive".to_string(),
                expected: Some("integer >= 1".to_string()),
                actual: Some(days.to_string()),
            });
        }

        if let Some(days) = policy.recent_window_days
            && days <= 0
        {
            errors.push(ConfigValidationError {
                field: "policy.recentWindowDays".to_string(),
                message: "recent window must be positive".to_string(),
                expected: Some("integer >= 1".to_string()),
                actual: Some(days.to_string()),
            });
        }

        if let Some(publishers) = &policy.known_publishers
            && publishers.is_empty()
        {
            warnings.push(ConfigValidationWarning {
                field: "policy.knownPublishers".to_string(),
                message: "no known publishers, msPublished will stay empty".to_string(),
                suggestion: Some("Remove the key to use the default publisher list".to_string()),
            });
        }
    }

    fn validate_publish_options(
        publish: &PublishConfig,
        errors: &mut Vec<ConfigValidationError>,
        _warnings: &mut Vec<ConfigValidationWarning>,
    ) {
        if publish.concurrency == Some(0) {
            errors.push(ConfigValidationError {
                field: "publish.concurrency".to_string(),
                message: "concurrency must be at least 1".to_string(),
                expected: Some("integer >= 1".to_string()),
                actual: Some("0".to_string()),
            });
        }

        if publish.timeout_minutes == Some(0) {
            errors.push(ConfigValidationError {
                field: "publish.timeoutMinutes".to_string(),
                message: "timeout must be at least one minute".to_string(),
                expected: Some("integer >= 1".to_string()),
                actual: Some("0".to_string()),
            });
        }
    }

    /// Format validation result as human-readable string
    pub fn format_validation_result(result: &ConfigValidationResult) -> String {
        let mut lines = Vec::new();

        if result.valid {
            lines.push("✅ Configuration validation succeeded".to_string());
        } else {
            lines.push("❌ Configuration has errors".to_string());
        }

        if !result.errors.is_empty() {
            lines.push("\n🔴 Errors:".to_string());
            for error in &result.errors {
                lines.push(format!("  - [{}] {}", error.field, error.message));
                if let (Some(expected), Some(actual)) = (&error.expected, &error.actual) {
                    lines.push(format!("    Expected: {}", expected));
                    lines.push(format!("    Actual: {}", actual));
                }
            }
        }

        if !result.warnings.is_empty() {
            lines.push("\n🟡 Warnings:".to_string());
            for warning in &result.warnings {
                lines.push(format!("  - [{}] {}", warning.field, warning.message));
                if let Some(suggestion) = &warning.suggestion {
                    lines.push(format!("    Suggestion: {}", suggestion));
                }
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(project: &TempDir, global: Option<&TempDir>) -> ConfigLoadOptions {
        ConfigLoadOptions {
            project_path: project.path().to_path_buf(),
            cli_args: None,
            env: HashMap::new(),
            global_dir: global.map(|dir| dir.path().to_path_buf()),
        }
    }

    #[test]
    fn test_load_env_config() {
        let env = HashMap::from([
            (
                "FAILED_EXTENSIONS".to_string(),
                "acme.one, acme.two,".to_string(),
            ),
            ("DRY_RUN".to_string(), "1".to_string()),
            ("EXTENSION_SYNC_STORE".to_string(), "/data/ext.json".to_string()),
            ("EXTENSION_SYNC_CONCURRENCY".to_string(), "4".to_string()),
        ]);

        let config = ConfigLoader::load_env_config(&env).unwrap();
        let publish = config.publish.as_ref().unwrap();

        assert_eq!(
            publish.only,
            Some(vec!["acme.one".to_string(), "acme.two".to_string()])
        );
        assert_eq!(publish.dry_run, Some(true));
        assert_eq!(publish.concurrency, Some(4));
        assert_eq!(config.store_path(), PathBuf::from("/data/ext.json"));
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let env = HashMap::from([
            ("DRY_RUN".to_string(), "".to_string()),
            ("FAILED_EXTENSIONS".to_string(), " , ".to_string()),
            ("EXTENSION_SYNC_CONCURRENCY".to_string(), "many".to_string()),
        ]);

        assert!(ConfigLoader::load_env_config(&env).is_none());
    }

    #[test]
    fn test_expand_string() {
        let env = HashMap::from([("GALLERY_HOST".to_string(), "gallery.local".to_string())]);

        let result = ConfigLoader::expand_string("https://${GALLERY_HOST}/api/${MISSING}", &env);

        assert_eq!(result, "https://gallery.local/api/${MISSING}");
    }

    #[test]
    fn test_merge_configs_field_by_field() {
        let global = SyncConfig {
            policy: Some(PolicyConfig {
                staleness_days: Some(10),
                hit_window_days: Some(1.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let project = SyncConfig {
            policy: Some(PolicyConfig {
                staleness_days: Some(20),
                ..Default::default()
            }),
            ..Default::default()
        };

        let merged = ConfigLoader::merge_configs(vec![global, project]);
        let policy = merged.policy.unwrap();

        assert_eq!(policy.staleness_days, Some(20));
        assert_eq!(policy.hit_window_days, Some(1.0));
    }

    #[tokio::test]
    async fn test_load_priority() {
        let project = TempDir::new().unwrap();
        let global = TempDir::new().unwrap();
        std::fs::write(
            global.path().join(CONFIG_FILENAME),
            "publish:\n  concurrency: 2\n  timeoutMinutes: 9\nreport:\n  path: /global/stat.json\n",
        )
        .unwrap();
        std::fs::write(
            project.path().join(CONFIG_FILENAME),
            "publish:\n  concurrency: 3\nmarketplaces:\n  primaryUrl: https://${HOST}/gallery\n",
        )
        .unwrap();

        let mut load_options = options(&project, Some(&global));
        load_options.env = HashMap::from([
            ("EXTENSION_SYNC_CONCURRENCY".to_string(), "6".to_string()),
            ("HOST".to_string(), "mirror.local".to_string()),
        ]);
        load_options.cli_args = Some(SyncConfig {
            report: Some(ReportConfig {
                path: Some("cli.json".to_string()),
            }),
            ..Default::default()
        });

        let config = ConfigLoader::load(load_options).await.unwrap();
        let batch = config.batch_options();

        assert_eq!(batch.max_concurrency, 6);
        assert_eq!(batch.default_timeout_minutes, 9);
        assert_eq!(config.report_path(), PathBuf::from("cli.json"));
        assert_eq!(config.primary_url(), "https://mirror.local/gallery");
    }

    #[tokio::test]
    async fn test_load_extends_base_file() {
        let project = TempDir::new().unwrap();
        std::fs::write(
            project.path().join("base.yaml"),
            "store:\n  path: base.json\nupgrade:\n  failedLog: /base/failed.log\n",
        )
        .unwrap();
        std::fs::write(
            project.path().join(CONFIG_FILENAME),
            "extends: base.yaml\nstore:\n  path: project.json\n",
        )
        .unwrap();

        let config = ConfigLoader::load(options(&project, None)).await.unwrap();

        assert_eq!(config.store_path(), PathBuf::from("project.json"));
        assert_eq!(
            config.upgrade_options(None).failed_log,
            PathBuf::from("/base/failed.log")
        );
    }

    #[tokio::test]
    async fn test_invalid_yaml_is_config_error() {
        let project = TempDir::new().unwrap();
        std::fs::write(project.path().join(CONFIG_FILENAME), "publish: [unclosed").unwrap();

        let result = ConfigLoader::load(options(&project, None)).await;

        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_validate_defaults() {
        let result = ConfigLoader::validate(&SyncConfig::default());

        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_validate_errors() {
        let config = SyncConfig {
            policy: Some(PolicyConfig {
                staleness_days: Some(0),
                hit_window_days: Some(45.0),
                ..Default::default()
            }),
            publish: Some(PublishConfig {
                concurrency: Some(0),
                timeout_minutes: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = ConfigLoader::validate(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();

        assert!(!result.valid);
        assert_eq!(
            fields,
            vec![
                "policy.stalenessDays",
                "policy.hitWindowDays",
                "publish.concurrency",
                "publish.timeoutMinutes",
            ]
        );
    }

    #[test]
    fn test_validate_warnings() {
        let config = SyncConfig {
            version: "2.0".to_string(),
            policy: Some(PolicyConfig {
                known_publishers: Some(Vec::new()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = ConfigLoader::validate(&config);

        assert!(result.valid);
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(result.warnings[0].field, "version");
        assert_eq!(result.warnings[1].field, "policy.knownPublishers");
    }

    #[test]
    fn test_format_validation_result() {
        let result = ConfigValidationResult {
            valid: false,
            errors: vec![ConfigValidationError {
                field: "publish.concurrency".to_string(),
                message: "concurrency must be at least 1".to_string(),
                expected: Some("integer >= 1".to_string()),
                actual: Some("0".to_string()),
            }],
            warnings: vec![ConfigValidationWarning {
                field: "version".to_string(),
                message: "Unknown version: 2.0".to_string(),
                suggestion: Some("Currently supported version is \"1.0\" only".to_string()),
            }],
        };

        let formatted = ConfigLoader::format_validation_result(&result);

        assert!(formatted.contains("❌ Configuration has errors"));
        assert!(formatted.contains("🔴 Errors:"));
        assert!(formatted.contains("[publish.concurrency]"));
        assert!(formatted.contains("🟡 Warnings:"));
        assert!(formatted.contains("Suggestion:"));
    }
}

//! StatLedger - Freshness classification and run statistics
//!
//! Features:
//! - Five mutually exclusive freshness buckets per package id
//! - Known-publisher tracking
//! - Sync latency hit/miss over a trailing window
//! - Failed-id list
//! - JSON report and Markdown summary

use crate::core::error::SyncError;
use crate::core::traits::VersionRecord;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio::fs;

/// Publishers whose extensions are tracked in `msPublished`
pub const DEFAULT_KNOWN_PUBLISHERS: &[&str] = &[
    "ms-python",
    "ms-toolsai",
    "ms-vscode",
    "dbaeumer",
    "GitHub",
    "Tyriar",
    "ms-azuretools",
    "msjsdiag",
    "ms-mssql",
    "vscjava",
    "ms-vsts",
];

/// Maximum latency in days still counted as a hit
pub const DEFAULT_HIT_WINDOW_DAYS: f64 = 2.0;

/// Trailing window in days for hit/miss tracking
pub const DEFAULT_RECENT_WINDOW_DAYS: i64 = 30;

/// Freshness bucket of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FreshnessBucket {
    UpToDate,
    Outdated,
    Unstable,
    NotInOpen,
    #[serde(rename = "notInMS")]
    NotInMs,
}

impl FreshnessBucket {
    /// Packages in these buckets are not published again
    pub fn is_fresh(self) -> bool {
        matches!(self, FreshnessBucket::UpToDate | FreshnessBucket::Unstable)
    }

    pub fn label(self) -> &'static str {
        match self {
            FreshnessBucket::UpToDate => "up to date",
            FreshnessBucket::Outdated => "outdated",
            FreshnessBucket::Unstable => "unstable",
            FreshnessBucket::NotInOpen => "not in secondary",
            FreshnessBucket::NotInMs => "not in primary",
        }
    }
}

/// Comparison of one package across both marketplaces
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStat {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ms_installs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ms_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_in_between: Option<f64>,
}

/// Primary marketplace figures for a known publisher's package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MsExtensionStat {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ms_installs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ms_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitMiss {
    #[serde(flatten)]
    pub stat: ExtensionStat,
    pub hit: bool,
}

/// Classification thresholds
#[derive(Debug, Clone)]
pub struct LedgerPolicy {
    pub known_publishers: HashSet<String>,
    pub hit_window_days: f64,
    pub recent_window: Duration,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            known_publishers: DEFAULT_KNOWN_PUBLISHERS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            hit_window_days: DEFAULT_HIT_WINDOW_DAYS,
            recent_window: Duration::days(DEFAULT_RECENT_WINDOW_DAYS),
        }
    }
}

/// Run-scoped statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatLedger {
    pub up_to_date: BTreeMap<String, ExtensionStat>,
    pub outdated: BTreeMap<String, ExtensionStat>,
    pub unstable: BTreeMap<String, ExtensionStat>,
    pub not_in_open: BTreeMap<String, ExtensionStat>,
    #[serde(rename = "notInMS")]
    pub not_in_ms: Vec<String>,
    pub ms_published: BTreeMap<String, MsExtensionStat>,
    pub hit_miss: BTreeMap<String, HitMiss>,
    pub failed: Vec<String>,
}

impl StatLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `id` from fresh version records, replacing any earlier classification
    pub fn classify(
        &mut self,
        id: &str,
        primary: Option<&VersionRecord>,
        secondary: Option<&VersionRecord>,
        policy: &LedgerPolicy,
        now: DateTime<Utc>,
    ) -> Result<FreshnessBucket, SyncError> {
        if let Some(primary) = primary
            && primary
                .publisher_name
                .as_ref()
                .is_some_and(|p| policy.known_publishers.contains(p))
        {
            self.ms_published.insert(
                id.to_string(),
                MsExtensionStat {
                    ms_installs: primary.install_count,
                    ms_version: Some(primary.version.clone()),
                },
            );
        }

        let days_in_between = match (primary, secondary) {
            (Some(primary), Some(secondary)) => {
                let millis = (secondary.last_updated - primary.last_updated).num_milliseconds();
                Some(millis as f64 / (1000.0 * 3600.0 * 24.0))
            }
            _ => None,
        };
        let stat = ExtensionStat {
            ms_installs: primary.and_then(|p| p.install_count),
            ms_version: primary.map(|p| p.version.clone()),
            open_version: secondary.map(|s| s.version.clone()),
            days_in_between,
        };

        self.remove_memberships(id);

        let bucket = match (primary, secondary) {
            (None, _) => {
                self.not_in_ms.push(id.to_string());
                FreshnessBucket::NotInMs
            }
            (Some(_), None) => {
                self.not_in_open.insert(id.to_string(), stat.clone());
                FreshnessBucket::NotInOpen
            }
            (Some(primary), Some(secondary)) => {
                let ms = parse_version(id, &primary.version)?;
                let open = parse_version(id, &secondary.version)?;
                let (bucket, map) = match ms.cmp(&open) {
                    std::cmp::Ordering::Equal => (FreshnessBucket::UpToDate, &mut self.up_to_date),
                    std::cmp::Ordering::Greater => (FreshnessBucket::Outdated, &mut self.outdated),
                    std::cmp::Ordering::Less => (FreshnessBucket::Unstable, &mut self.unstable),
                };
                map.insert(id.to_string(), stat.clone());
                bucket
            }
        };

        if let Some(primary) = primary
            && primary.last_updated >= now - policy.recent_window
        {
            let hit = days_in_between.is_some_and(|d| 0.0 < d && d <= policy.hit_window_days);
            self.hit_miss
                .insert(id.to_string(), HitMiss { stat, hit });
        }

        Ok(bucket)
    }

    fn remove_memberships(&mut self, id: &str) {
        self.not_in_ms.retain(|existing| existing != id);
        self.not_in_open.remove(id);
        self.up_to_date.remove(id);
        self.outdated.remove(id);
        self.unstable.remove(id);
        self.hit_miss.remove(id);
    }

    /// Current bucket of `id`, if classified
    pub fn bucket_of(&self, id: &str) -> Option<FreshnessBucket> {
        if self.up_to_date.contains_key(id) {
            Some(FreshnessBucket::UpToDate)
        } else if self.outdated.contains_key(id) {
            Some(FreshnessBucket::Outdated)
        } else if self.unstable.contains_key(id) {
            Some(FreshnessBucket::Unstable)
        } else if self.not_in_open.contains_key(id) {
            Some(FreshnessBucket::NotInOpen)
        } else if self.not_in_ms.iter().any(|existing| existing == id) {
            Some(FreshnessBucket::NotInMs)
        } else {
            None
        }
    }

    /// Number of buckets `id` currently belongs to
    pub fn membership_count(&self, id: &str) -> usize {
        [
            self.up_to_date.contains_key(id),
            self.outdated.contains_key(id),
            self.unstable.contains_key(id),
            self.not_in_open.contains_key(id),
        ]
        .into_iter()
        .filter(|member| *member)
        .count()
            + self.not_in_ms.iter().filter(|existing| *existing == id).count()
    }

    pub fn record_failure(&mut self, id: &str) {
        if !self.failed.iter().any(|existing| existing == id) {
            self.failed.push(id.to_string());
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Fraction of recently updated packages that synced within the hit window
    pub fn hit_rate(&self) -> Option<f64> {
        if self.hit_miss.is_empty() {
            return None;
        }
        let hits = self.hit_miss.values().filter(|h| h.hit).count();
        Some(hits as f64 / self.hit_miss.len() as f64)
    }

    /// Markdown summary of the run
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str("# Sync Report\n\n");
        md.push_str("| Bucket | Count |\n");
        md.push_str("|--------|-------|\n");
        md.push_str(&format!("| Up to date | {} |\n", self.up_to_date.len()));
        md.push_str(&format!("| Outdated | {} |\n", self.outdated.len()));
        md.push_str(&format!("| Unstable | {} |\n", self.unstable.len()));
        md.push_str(&format!("| Not in secondary | {} |\n", self.not_in_open.len()));
        md.push_str(&format!("| Not in primary | {} |\n", self.not_in_ms.len()));
        md.push_str(&format!("| Known publishers | {} |\n\n", self.ms_published.len()));

        match self.hit_rate() {
            Some(rate) => md.push_str(&format!(
                "**Hit rate:** {:.1}% ({} recently updated)\n\n",
                rate * 100.0,
                self.hit_miss.len()
            )),
            None => md.push_str("**Hit rate:** n/a\n\n"),
        }

        if self.failed.is_empty() {
            md.push_str("No failures.\n");
        } else {
            md.push_str(&format!("## Failed ({})\n\n", self.failed.len()));
            for id in &self.failed {
                md.push_str(&format!("- {}\n", id));
            }
        }

        md
    }

    /// Serialize the ledger to `path` as JSON
    pub async fn write_report(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string(self)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, json).await?;
        Ok(())
    }
}

fn parse_version(id: &str, version: &str) -> Result<semver::Version, SyncError> {
    semver::Version::parse(version).map_err(|_| SyncError::InvalidVersion {
        id: id.to_string(),
        version: version.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn record(version: &str, days_ago: i64) -> VersionRecord {
        VersionRecord::new(version, now() - Duration::days(days_ago))
    }

    fn classify(
        ledger: &mut StatLedger,
        id: &str,
        ms: Option<VersionRecord>,
        open: Option<VersionRecord>,
    ) -> FreshnessBucket {
        ledger
            .classify(id, ms.as_ref(), open.as_ref(), &LedgerPolicy::default(), now())
            .unwrap()
    }

    #[test]
    fn test_classification_follows_semver() {
        let mut ledger = StatLedger::new();

        let cases = [
            ("a.eq", "1.2.0", "1.2.0", FreshnessBucket::UpToDate),
            ("a.gt", "1.10.0", "1.9.0", FreshnessBucket::Outdated),
            ("a.lt", "1.0.0", "1.0.1", FreshnessBucket::Unstable),
            ("a.pre", "1.0.0", "1.0.0-beta.1", FreshnessBucket::Outdated),
        ];

        for (id, ms, open, expected) in cases {
            let bucket = classify(
                &mut ledger,
                id,
                Some(record(ms, 5)),
                Some(record(open, 4)),
            );
            assert_eq!(bucket, expected, "{}", id);
            assert_eq!(ledger.bucket_of(id), Some(expected));
        }
    }

    #[test]
    fn test_absent_records() {
        let mut ledger = StatLedger::new();

        assert_eq!(
            classify(&mut ledger, "a.none", None, Some(record("1.0.0", 1))),
            FreshnessBucket::NotInMs
        );
        assert_eq!(
            classify(&mut ledger, "a.open", Some(record("1.0.0", 1)), None),
            FreshnessBucket::NotInOpen
        );
        assert_eq!(ledger.not_in_ms, vec!["a.none".to_string()]);
        assert_eq!(
            ledger.not_in_open["a.open"].ms_version.as_deref(),
            Some("1.0.0")
        );
    }

    #[test]
    fn test_reclassification_keeps_single_membership() {
        let mut ledger = StatLedger::new();

        classify(&mut ledger, "a.b", None, None);
        classify(&mut ledger, "a.b", None, None);
        assert_eq!(ledger.membership_count("a.b"), 1);

        classify(&mut ledger, "a.b", Some(record("1.2.0", 40)), None);
        assert_eq!(ledger.membership_count("a.b"), 1);

        let bucket = classify(
            &mut ledger,
            "a.b",
            Some(record("1.2.0", 40)),
            Some(record("1.2.0", 0)),
        );
        assert_eq!(bucket, FreshnessBucket::UpToDate);
        assert_eq!(ledger.membership_count("a.b"), 1);
        assert!(ledger.not_in_open.is_empty());
        assert!(ledger.not_in_ms.is_empty());
    }

    #[test]
    fn test_invalid_version() {
        let mut ledger = StatLedger::new();

        let result = ledger.classify(
            "a.b",
            Some(&record("latest", 1)),
            Some(&record("1.0.0", 1)),
            &LedgerPolicy::default(),
            now(),
        );

        assert!(matches!(result, Err(SyncError::InvalidVersion { .. })));
        assert_eq!(ledger.membership_count("a.b"), 0);
    }

    #[test]
    fn test_hit_miss_window() {
        let mut ledger = StatLedger::new();

        // secondary caught up one day after the primary update
        classify(
            &mut ledger,
            "a.hit",
            Some(record("1.0.0", 10)),
            Some(record("1.0.0", 9)),
        );
        // five days behind
        classify(
            &mut ledger,
            "a.miss",
            Some(record("1.0.0", 10)),
            Some(record("0.9.0", 5)),
        );
        // never published to the secondary
        classify(&mut ledger, "a.absent", Some(record("1.0.0", 10)), None);
        // primary update outside the trailing window
        classify(
            &mut ledger,
            "a.old",
            Some(record("1.0.0", 45)),
            Some(record("1.0.0", 44)),
        );

        assert!(ledger.hit_miss["a.hit"].hit);
        assert!(!ledger.hit_miss["a.miss"].hit);
        assert!(!ledger.hit_miss["a.absent"].hit);
        assert!(!ledger.hit_miss.contains_key("a.old"));
        assert_eq!(ledger.hit_rate(), Some(1.0 / 3.0));
    }

    #[test]
    fn test_known_publisher_recorded() {
        let mut ledger = StatLedger::new();
        let mut ms = record("2.0.0", 3);
        ms.publisher_name = Some("ms-python".to_string());
        ms.install_count = Some(1000);

        classify(&mut ledger, "ms-python.python", Some(ms), None);

        let stat = &ledger.ms_published["ms-python.python"];
        assert_eq!(stat.ms_installs, Some(1000));
        assert_eq!(stat.ms_version.as_deref(), Some("2.0.0"));
    }

    #[test]
    fn test_failed_is_deduplicated() {
        let mut ledger = StatLedger::new();

        ledger.record_failure("a.b");
        ledger.record_failure("a.b");

        assert_eq!(ledger.failed, vec!["a.b".to_string()]);
        assert!(ledger.has_failures());
    }

    #[test]
    fn test_report_keys() {
        let mut ledger = StatLedger::new();
        classify(&mut ledger, "a.none", None, None);
        classify(
            &mut ledger,
            "a.same",
            Some(record("1.0.0", 3)),
            Some(record("1.0.0", 2)),
        );

        let json: serde_json::Value = serde_json::to_value(&ledger).unwrap();

        for key in [
            "upToDate",
            "outdated",
            "unstable",
            "notInOpen",
            "notInMS",
            "msPublished",
            "hitMiss",
            "failed",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["upToDate"]["a.same"]["openVersion"], "1.0.0");
        assert_eq!(json["hitMiss"]["a.same"]["hit"], true);
        assert_eq!(json["hitMiss"]["a.same"]["msVersion"], "1.0.0");
    }

    #[test]
    fn test_markdown_summary() {
        let mut ledger = StatLedger::new();
        classify(&mut ledger, "a.none", None, None);
        ledger.record_failure("a.none");

        let md = ledger.to_markdown();

        assert!(md.contains("| Not in primary | 1 |"));
        assert!(md.contains("## Failed (1)"));
        assert!(md.contains("- a.none"));
    }

    #[tokio::test]
    async fn test_write_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("stat.json");
        let mut ledger = StatLedger::new();
        ledger.record_failure("a.b");

        ledger.write_report(&path).await.unwrap();

        let content = fs::read_to_string(&path).await.unwrap();
        let back: StatLedger = serde_json::from_str(&content).unwrap();
        assert_eq!(back, ledger);
    }
}

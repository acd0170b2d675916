//! Gallery `extensionquery` client
//!
//! Both marketplaces expose the same gallery API. A package is looked up by
//! its full id; the first version entry of the first match is the latest
//! published version.

use crate::core::error::SyncError;
use crate::core::retry::{RetryManager, RetryOptions};
use crate::core::traits::{VersionOracle, VersionRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub const PRIMARY_GALLERY_URL: &str = "https://marketplace.visualstudio.com/_apis/public/gallery";
pub const SECONDARY_GALLERY_URL: &str = "https://open-vsx.org/vscode/gallery";

const API_VERSION: &str = "3.0-preview.1";

/// Filter by full extension name (`publisher.name`)
const FILTER_EXTENSION_NAME: u32 = 7;

const FLAG_INCLUDE_VERSIONS: u32 = 0x1;
const FLAG_INCLUDE_STATISTICS: u32 = 0x100;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    extensions: Vec<GalleryExtension>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GalleryExtension {
    publisher: Option<GalleryPublisher>,
    #[serde(default)]
    versions: Vec<GalleryVersion>,
    #[serde(default)]
    statistics: Vec<GalleryStatistic>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GalleryPublisher {
    publisher_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GalleryVersion {
    version: String,
    last_updated: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GalleryStatistic {
    statistic_name: String,
    value: f64,
}

/// Version oracle backed by a gallery endpoint
#[derive(Debug, Clone)]
pub struct GalleryOracle {
    name: String,
    base_url: String,
    client: reqwest::Client,
    retry: RetryManager,
}

impl GalleryOracle {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("extension-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            retry: RetryManager::new(RetryOptions::default()),
        })
    }

    pub fn with_retry(mut self, options: RetryOptions) -> Self {
        self.retry = RetryManager::new(options);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn query(&self, id: &str) -> Result<Option<VersionRecord>, SyncError> {
        let url = format!("{}/extensionquery", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(
                reqwest::header::ACCEPT,
                format!("application/json;api-version={}", API_VERSION),
            )
            .json(&build_query(id))
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SyncError::TransientNetwork {
                service: self.name.clone(),
                message: format!("HTTP {}", status),
            });
        }
        if !status.is_success() {
            return Err(SyncError::Remote {
                service: self.name.clone(),
                message: format!("HTTP {} for {}", status, id),
            });
        }

        let body: QueryResponse = response.json().await.map_err(|e| self.request_error(e))?;
        Ok(parse_response(body))
    }

    fn request_error(&self, error: reqwest::Error) -> SyncError {
        if error.is_connect() || error.is_timeout() || error.is_request() {
            SyncError::TransientNetwork {
                service: self.name.clone(),
                message: error.to_string(),
            }
        } else {
            SyncError::Remote {
                service: self.name.clone(),
                message: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl VersionOracle for GalleryOracle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, id: &str) -> Result<Option<VersionRecord>, SyncError> {
        let record = self.retry.retry(|| self.query(id)).await?;
        debug!(
            marketplace = %self.name,
            id,
            version = record.as_ref().map(|r| r.version.as_str()),
            "looked up extension"
        );
        Ok(record)
    }
}

fn build_query(id: &str) -> serde_json::Value {
    json!({
        "filters": [{
            "criteria": [{ "filterType": FILTER_EXTENSION_NAME, "value": id }],
            "pageNumber": 1,
            "pageSize": 1,
            "sortBy": 0,
            "sortOrder": 0
        }],
        "assetTypes": [],
        "flags": FLAG_INCLUDE_VERSIONS | FLAG_INCLUDE_STATISTICS
    })
}

fn parse_response(response: QueryResponse) -> Option<VersionRecord> {
    let extension = response
        .results
        .into_iter()
        .flat_map(|result| result.extensions)
        .next()?;
    let latest = extension.versions.into_iter().next()?;

    let install_count = extension
        .statistics
        .iter()
        .find(|s| s.statistic_name == "install")
        .map(|s| s.value.max(0.0) as u64);

    Some(VersionRecord {
        version: latest.version,
        last_updated: latest.last_updated,
        install_count,
        publisher_name: extension.publisher.and_then(|p| p.publisher_name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(json: &str) -> Option<VersionRecord> {
        parse_response(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_build_query() {
        let query = build_query("redhat.java");

        assert_eq!(query["filters"][0]["criteria"][0]["filterType"], 7);
        assert_eq!(query["filters"][0]["criteria"][0]["value"], "redhat.java");
        assert_eq!(query["flags"], 0x101);
    }

    #[test]
    fn test_parse_full_response() {
        let record = parse(
            r#"{
              "results": [{
                "extensions": [{
                  "publisher": { "publisherName": "ms-python" },
                  "extensionName": "python",
                  "versions": [
                    { "version": "2024.2.1", "lastUpdated": "2024-02-20T10:15:00.12Z" },
                    { "version": "2024.2.0", "lastUpdated": "2024-02-10T08:00:00Z" }
                  ],
                  "statistics": [
                    { "statisticName": "averagerating", "value": 3.9 },
                    { "statisticName": "install", "value": 105443210.0 }
                  ]
                }]
              }]
            }"#,
        )
        .unwrap();

        assert_eq!(record.version, "2024.2.1");
        assert_eq!(record.install_count, Some(105443210));
        assert_eq!(record.publisher_name.as_deref(), Some("ms-python"));
        assert_eq!(
            record.last_updated.date_naive(),
            Utc.with_ymd_and_hms(2024, 2, 20, 0, 0, 0).unwrap().date_naive()
        );
    }

    #[test]
    fn test_parse_without_statistics() {
        let record = parse(
            r#"{"results":[{"extensions":[{"versions":[{"version":"0.1.0","lastUpdated":"2023-01-01T00:00:00Z"}]}]}]}"#,
        )
        .unwrap();

        assert_eq!(record.install_count, None);
        assert_eq!(record.publisher_name, None);
    }

    #[test]
    fn test_parse_absent_extension() {
        assert!(parse(r#"{"results":[{"extensions":[]}]}"#).is_none());
        assert!(parse(r#"{"results":[]}"#).is_none());
        assert!(parse(r#"{}"#).is_none());
    }

    #[test]
    fn test_parse_extension_without_versions() {
        assert!(parse(r#"{"results":[{"extensions":[{"versions":[]}]}]}"#).is_none());
    }

    #[test]
    fn test_new_trims_base_url() {
        let oracle = GalleryOracle::new("open-vsx", "https://open-vsx.org/vscode/gallery/").unwrap();

        assert_eq!(oracle.base_url(), "https://open-vsx.org/vscode/gallery");
        assert_eq!(oracle.name(), "open-vsx");
    }
}

//! GitHub REST client for releases and release assets

use crate::core::error::SyncError;
use crate::core::retry::{RetryManager, RetryOptions};
use crate::core::traits::{Release, ReleaseAsset};
use crate::security::SecureTokenManager;
use crate::security::token_manager::GITHUB_SERVICE;
use lazy_static::lazy_static;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

const SERVICE: &str = "github";
const API_URL: &str = "https://api.github.com";

lazy_static! {
    static ref GITHUB_REPO: Regex =
        Regex::new(r"^(?:https?://|git@|git://)(?:www\.)?github\.com[/:]([^/\s]+)/([^/\s#?]+?)(?:\.git)?/?$")
            .unwrap();

    /// `https://github.com/<owner>/<repo>/releases/download/<tag>/<file>`
    static ref RELEASE_DOWNLOAD: Regex =
        Regex::new(r"^https://github\.com/([^/]+)/([^/]+)/releases/download/([^/]+)/([^/]+)$")
            .unwrap();
}

#[derive(Debug, Deserialize)]
struct ApiRelease {
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    assets: Vec<ApiAsset>,
}

#[derive(Debug, Deserialize)]
struct ApiAsset {
    name: String,
    browser_download_url: String,
}

/// Owner and name of a GitHub repository URL
pub fn parse_github_repo(url: &str) -> Option<(String, String)> {
    let captures = GITHUB_REPO.captures(url.trim())?;
    Some((captures[1].to_string(), captures[2].to_string()))
}

/// A parsed GitHub release download URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDownload {
    pub owner: String,
    pub repo: String,
    pub tag: String,
    pub file: String,
}

impl ReleaseDownload {
    pub fn parse(url: &str) -> Option<Self> {
        let captures = RELEASE_DOWNLOAD.captures(url.trim())?;
        Some(Self {
            owner: captures[1].to_string(),
            repo: captures[2].to_string(),
            tag: captures[3].to_string(),
            file: captures[4].to_string(),
        })
    }

    pub fn repository_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.repo)
    }
}

/// Releases of GitHub-hosted repositories
#[derive(Debug)]
pub struct GitHubReleases {
    client: reqwest::Client,
    api_url: String,
    token: Option<SecretString>,
    retry: RetryManager,
}

impl GitHubReleases {
    pub fn new() -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("extension-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: API_URL.to_string(),
            token: SecureTokenManager::new().get_token(GITHUB_SERVICE),
            retry: RetryManager::new(RetryOptions::default()),
        })
    }

    pub fn with_retry(mut self, options: RetryOptions) -> Self {
        self.retry = RetryManager::new(options);
        self
    }

    /// Published releases, newest first; empty for repositories not hosted on GitHub
    pub async fn releases(&self, repository: &str) -> Result<Vec<Release>, SyncError> {
        let Some((owner, repo)) = parse_github_repo(repository) else {
            return Ok(Vec::new());
        };
        let url = format!("{}/repos/{}/{}/releases?per_page=100", self.api_url, owner, repo);

        let releases = self.retry.retry(|| self.get_releases(&url)).await?;
        Ok(convert_releases(releases))
    }

    async fn get_releases(&self, url: &str) -> Result<Vec<ApiRelease>, SyncError> {
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(network_error)?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SyncError::TransientNetwork {
                service: SERVICE.to_string(),
                message: format!("HTTP {} for {}", status, url),
            });
        }
        if !status.is_success() {
            return Err(SyncError::Remote {
                service: SERVICE.to_string(),
                message: format!("HTTP {} for {}", status, url),
            });
        }

        response.json().await.map_err(network_error)
    }
}

fn network_error(error: reqwest::Error) -> SyncError {
    if error.is_connect() || error.is_timeout() || error.is_request() {
        SyncError::TransientNetwork {
            service: SERVICE.to_string(),
            message: error.to_string(),
        }
    } else {
        SyncError::Remote {
            service: SERVICE.to_string(),
            message: error.to_string(),
        }
    }
}

fn convert_releases(releases: Vec<ApiRelease>) -> Vec<Release> {
    releases
        .into_iter()
        .filter(|release| !release.draft)
        .map(|release| Release {
            tag_name: release.tag_name,
            prerelease: release.prerelease,
            assets: release
                .assets
                .into_iter()
                .map(|asset| ReleaseAsset {
                    name: asset.name,
                    download_url: asset.browser_download_url,
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_github_repo() {
        let expected = Some(("microsoft".to_string(), "vscode-eslint".to_string()));

        assert_eq!(parse_github_repo("https://github.com/microsoft/vscode-eslint"), expected);
        assert_eq!(parse_github_repo("https://github.com/microsoft/vscode-eslint.git"), expected);
        assert_eq!(parse_github_repo("https://github.com/microsoft/vscode-eslint/"), expected);
        assert_eq!(parse_github_repo("git@github.com:microsoft/vscode-eslint.git"), expected);
        assert_eq!(parse_github_repo("https://gitlab.com/a/b"), None);
        assert_eq!(parse_github_repo("https://github.com/microsoft"), None);
    }

    #[test]
    fn test_parse_release_download() {
        let download = ReleaseDownload::parse(
            "https://github.com/vscodevim/vim/releases/download/v1.21.0/vim-1.21.0.vsix",
        )
        .unwrap();

        assert_eq!(download.owner, "vscodevim");
        assert_eq!(download.tag, "v1.21.0");
        assert_eq!(download.file, "vim-1.21.0.vsix");
        assert_eq!(download.repository_url(), "https://github.com/vscodevim/vim");
        assert!(ReleaseDownload::parse("https://example.com/vim-1.21.0.vsix").is_none());
    }

    #[test]
    fn test_convert_releases_skips_drafts() {
        let api: Vec<ApiRelease> = serde_json::from_str(
            r#"[
              { "tag_name": "v2.0.0", "draft": true, "assets": [] },
              { "tag_name": "v1.1.0", "prerelease": true, "assets": [] },
              { "tag_name": "v1.0.0", "assets": [
                  { "name": "ext-1.0.0.vsix", "browser_download_url": "https://github.com/a/b/releases/download/v1.0.0/ext-1.0.0.vsix" }
              ] }
            ]"#,
        )
        .unwrap();

        let releases = convert_releases(api);

        assert_eq!(releases.len(), 2);
        assert!(releases[0].prerelease);
        assert_eq!(releases[1].assets[0].name, "ext-1.0.0.vsix");
        assert!(releases[1].assets[0].download_url.ends_with("ext-1.0.0.vsix"));
    }

    #[tokio::test]
    async fn test_non_github_repository_has_no_releases() {
        let releases = GitHubReleases::new()
            .unwrap()
            .releases("https://gitlab.com/acme/widget")
            .await
            .unwrap();

        assert!(releases.is_empty());
    }
}

//! Upstream sources: releases, tags and history of extension repositories,
//! and the tools that build them

pub mod enumerator;
pub mod git;
pub mod github;
pub mod toolchain;

pub use enumerator::RepositoryEnumerator;
pub use git::GitClient;
pub use github::{GitHubReleases, ReleaseDownload, parse_github_repo};
pub use toolchain::ShellToolchain;

//! Store document I/O
//!
//! The store is read wholesale at the start of a run. The upgrade workflow
//! rewrites it wholesale: the current file is renamed to a backup first, the
//! new content is written next to it, and the backup is renamed back if
//! anything goes wrong.

use crate::core::error::SyncError;
use crate::store::tracked_package::TrackedPackage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

/// Default store file name
pub const STORE_FILENAME: &str = "extensions.json";

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    extensions: Vec<TrackedPackage>,
}

/// File-backed list of tracked packages
#[derive(Debug, Clone)]
pub struct PackageStore {
    path: PathBuf,
}

impl PackageStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path the current store is moved to during a rewrite
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".old");
        PathBuf::from(name)
    }

    pub async fn load(&self) -> Result<Vec<TrackedPackage>, SyncError> {
        Self::read_document(&self.path).await
    }

    /// Write the store (atomic: temp file, then rename)
    pub async fn save(&self, packages: &[TrackedPackage]) -> Result<(), SyncError> {
        let json = Self::render(packages)?;

        let mut temp_name = self.path.as_os_str().to_os_string();
        temp_name.push(".tmp");
        let temp_file = PathBuf::from(temp_name);

        fs::write(&temp_file, json)
            .await
            .map_err(|e| store_error(&temp_file, e))?;
        fs::rename(&temp_file, &self.path)
            .await
            .map_err(|e| store_error(&self.path, e))?;

        Ok(())
    }

    /// Move the current store aside and return a handle to finish or undo the rewrite
    pub async fn begin_rewrite(&self) -> Result<StoreRewrite<'_>, SyncError> {
        let original = self.load().await?;
        let backup = self.backup_path();

        fs::rename(&self.path, &backup)
            .await
            .map_err(|e| store_error(&self.path, e))?;

        Ok(StoreRewrite {
            store: self,
            backup,
            original,
        })
    }

    async fn read_document(path: &Path) -> Result<Vec<TrackedPackage>, SyncError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| store_error(path, e))?;

        let document: StoreDocument =
            serde_json::from_str(&content).map_err(|e| SyncError::Store {
                message: format!("failed to parse {}: {}", path.display(), e),
            })?;

        Ok(document.extensions)
    }

    fn render(packages: &[TrackedPackage]) -> Result<String, SyncError> {
        let document = StoreDocument {
            extensions: packages.to_vec(),
        };
        let mut json = serde_json::to_string_pretty(&document).map_err(|e| SyncError::Store {
            message: format!("failed to serialize store: {}", e),
        })?;
        json.push('\n');
        Ok(json)
    }
}

/// An in-progress store rewrite
#[derive(Debug)]
pub struct StoreRewrite<'a> {
    store: &'a PackageStore,
    backup: PathBuf,
    original: Vec<TrackedPackage>,
}

impl StoreRewrite<'_> {
    /// Store content before the rewrite started
    pub fn original(&self) -> &[TrackedPackage] {
        &self.original
    }

    /// Write the new content; the backup is kept next to the store
    pub async fn commit(&self, packages: &[TrackedPackage]) -> Result<(), SyncError> {
        self.store.save(packages).await?;
        info!(
            "Rewrote {} ({} extensions, backup at {})",
            self.store.path.display(),
            packages.len(),
            self.backup.display()
        );
        Ok(())
    }

    /// Restore the backup verbatim
    pub async fn rollback(self) -> Result<(), SyncError> {
        warn!("Restoring {} from backup", self.store.path.display());
        fs::rename(&self.backup, &self.store.path)
            .await
            .map_err(|e| store_error(&self.backup, e))
    }
}

fn store_error(path: &Path, error: std::io::Error) -> SyncError {
    SyncError::Store {
        message: format!("{}: {}", path.display(), error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DOCUMENT: &str = r#"{
  "extensions": [
    { "id": "a.one", "repository": "https://github.com/a/one" },
    { "id": "b.two", "repository": "https://github.com/b/two", "version": "1.0.0" }
  ]
}
"#;

    async fn store_in(dir: &TempDir) -> PackageStore {
        let path = dir.path().join(STORE_FILENAME);
        fs::write(&path, DOCUMENT).await.unwrap();
        PackageStore::new(path)
    }

    #[tokio::test]
    async fn test_load() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let packages = store.load().await.unwrap();

        assert_eq!(packages.len(), 2);
        assert_eq!(packages[1].pinned_version.as_deref(), Some("1.0.0"));
    }

    #[tokio::test]
    async fn test_load_invalid_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STORE_FILENAME);
        fs::write(&path, "{ not json").await.unwrap();

        let result = PackageStore::new(path).load().await;

        assert!(matches!(result, Err(SyncError::Store { .. })));
    }

    #[tokio::test]
    async fn test_save_writes_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        let packages = store.load().await.unwrap();

        store.save(&packages[..1]).await.unwrap();

        let content = fs::read_to_string(store.path()).await.unwrap();
        assert!(content.ends_with("}\n"));
        assert_eq!(store.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_commit_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let rewrite = store.begin_rewrite().await.unwrap();
        assert_eq!(rewrite.original().len(), 2);
        assert!(!store.path().exists());

        let updated = vec![TrackedPackage::new("c.three")];
        rewrite.commit(&updated).await.unwrap();

        assert_eq!(store.load().await.unwrap()[0].id, "c.three");
        assert!(store.backup_path().exists());
    }

    #[tokio::test]
    async fn test_rewrite_rollback_restores_verbatim() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let rewrite = store.begin_rewrite().await.unwrap();
        rewrite.rollback().await.unwrap();

        let content = fs::read_to_string(store.path()).await.unwrap();
        assert_eq!(content, DOCUMENT);
        assert!(!store.backup_path().exists());
    }
}

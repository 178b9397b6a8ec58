//! JSON file backend.
//!
//! Layout:
//!
//! ```text
//! <dir>/users.json
//! <dir>/system.json
//! <backup_dir>/users.<stamp>.bak
//! ```

use super::backend::{Backend, DocumentKey};
use crate::error::StoreError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct JsonFileBackend {
    dir: PathBuf,
    backup_dir: PathBuf,
}

impl JsonFileBackend {
    /// Create the data and backup directories if missing.
    pub async fn open(
        dir: impl AsRef<Path>,
        backup_dir: impl AsRef<Path>,
    ) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        let backup_dir = backup_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::create_dir_all(&backup_dir).await?;
        debug!(dir = %dir.display(), backups = %backup_dir.display(), "json store opened");
        Ok(Self { dir, backup_dir })
    }

    fn document_path(&self, key: DocumentKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }

    fn temp_path(&self, key: DocumentKey) -> PathBuf {
        self.dir.join(format!(".{}.json.tmp", key.as_str()))
    }

    fn snapshot_path(&self, key: DocumentKey, stamp: &str) -> PathBuf {
        self.backup_dir.join(format!("{}.{}.bak", key.as_str(), stamp))
    }

    /// Existing snapshots for `key`, oldest first.
    fn list_snapshots(&self, key: DocumentKey) -> Result<Vec<PathBuf>, StoreError> {
        let pattern = self.backup_dir.join(format!("{}.*.bak", key.as_str()));
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern)
            .map_err(|e| StoreError::Io(std::io::Error::other(e.to_string())))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, "unreadable backup entry");
                    None
                }
            })
            .collect();
        // Stamps are fixed-width, so name order is age order.
        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl Backend for JsonFileBackend {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn read(&self, key: DocumentKey) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(self.document_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: DocumentKey, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = self.temp_path(key);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, self.document_path(key)).await?;
        Ok(())
    }

    async fn snapshot(&self, key: DocumentKey, stamp: &str) -> Result<bool, StoreError> {
        let source = self.document_path(key);
        if !tokio::fs::try_exists(&source).await? {
            return Ok(false);
        }
        let target = self.snapshot_path(key, stamp);
        tokio::fs::copy(&source, &target).await?;
        debug!(document = %key, path = %target.display(), "snapshot written");
        Ok(true)
    }

    async fn prune_snapshots(&self, key: DocumentKey, keep: usize) -> Result<usize, StoreError> {
        let paths = self.list_snapshots(key)?;
        let excess = paths.len().saturating_sub(keep);
        let mut removed = 0;
        for path in paths.into_iter().take(excess) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove old backup"),
            }
        }
        Ok(removed)
    }
}

//! Redb-backed document storage.
//!
//! # Schema
//!
//! ```text
//! DOCUMENTS: "users" | "system" -> JSON bytes
//! SNAPSHOTS: "<doc>\0<stamp>"    -> JSON bytes
//! ```

use super::backend::{Backend, DocumentKey};
use crate::error::StoreError;
use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");
const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

fn db_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Database(e.to_string())
}

pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(db_err)?;

        // Ensure tables exist
        let write_txn = db.begin_write().map_err(db_err)?;
        {
            let _ = write_txn.open_table(DOCUMENTS).map_err(db_err)?;
            let _ = write_txn.open_table(SNAPSHOTS).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;

        info!(path = %path.as_ref().display(), "redb store initialized");
        Ok(Self { db: Arc::new(db) })
    }

    fn snapshot_prefix(key: DocumentKey) -> String {
        format!("{}\0", key.as_str())
    }

    fn snapshot_keys(&self, key: DocumentKey) -> Result<Vec<String>, StoreError> {
        let prefix = Self::snapshot_prefix(key);
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(SNAPSHOTS).map_err(db_err)?;

        let mut keys = Vec::new();
        for item in table.iter().map_err(db_err)? {
            let (k, _) = item.map_err(db_err)?;
            if k.value().starts_with(&prefix) {
                keys.push(k.value().to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl Backend for RedbBackend {
    fn name(&self) -> &'static str {
        "redb"
    }

    async fn read(&self, key: DocumentKey) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(DOCUMENTS).map_err(db_err)?;
        let value = table
            .get(key.as_str())
            .map_err(db_err)?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    async fn write(&self, key: DocumentKey, bytes: &[u8]) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(DOCUMENTS).map_err(db_err)?;
            table.insert(key.as_str(), bytes).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }

    async fn snapshot(&self, key: DocumentKey, stamp: &str) -> Result<bool, StoreError> {
        let snapshot_key = format!("{}{}", Self::snapshot_prefix(key), stamp);
        let write_txn = self.db.begin_write().map_err(db_err)?;
        let copied = {
            let current = {
                let documents = write_txn.open_table(DOCUMENTS).map_err(db_err)?;
                documents
                    .get(key.as_str())
                    .map_err(db_err)?
                    .map(|v| v.value().to_vec())
            };
            match current {
                Some(bytes) => {
                    let mut snapshots = write_txn.open_table(SNAPSHOTS).map_err(db_err)?;
                    snapshots
                        .insert(snapshot_key.as_str(), bytes.as_slice())
                        .map_err(db_err)?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit().map_err(db_err)?;
        Ok(copied)
    }

    async fn prune_snapshots(&self, key: DocumentKey, keep: usize) -> Result<usize, StoreError> {
        let keys = self.snapshot_keys(key)?;
        let excess = keys.len().saturating_sub(keep);
        if excess == 0 {
            return Ok(0);
        }

        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(SNAPSHOTS).map_err(db_err)?;
            for k in keys.iter().take(excess) {
                table.remove(k.as_str()).map_err(db_err)?;
            }
        }
        write_txn.commit().map_err(db_err)?;
        Ok(excess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.redb");
        {
            let backend = RedbBackend::open(&path).unwrap();
            backend.write(DocumentKey::Users, b"{\"1\":{}}").await.unwrap();
        }
        let backend = RedbBackend::open(&path).unwrap();
        let bytes = backend.read(DocumentKey::Users).await.unwrap().unwrap();
        assert_eq!(bytes, b"{\"1\":{}}");
        assert!(backend.read(DocumentKey::System).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshots_are_pruned_per_document() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("store.redb")).unwrap();
        backend.write(DocumentKey::Users, b"u").await.unwrap();
        backend.write(DocumentKey::System, b"s").await.unwrap();
        for stamp in ["a", "b", "c"] {
            backend.snapshot(DocumentKey::Users, stamp).await.unwrap();
        }
        backend.snapshot(DocumentKey::System, "a").await.unwrap();

        assert_eq!(backend.prune_snapshots(DocumentKey::Users, 1).await.unwrap(), 2);
        assert_eq!(backend.snapshot_keys(DocumentKey::Users).unwrap(), vec!["users\0c"]);
        assert_eq!(backend.snapshot_keys(DocumentKey::System).unwrap().len(), 1);
    }
}

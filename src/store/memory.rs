//! In-process backend for tests and ephemeral runs.

use super::backend::{Backend, DocumentKey};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct MemoryBackend {
    documents: Mutex<HashMap<DocumentKey, Vec<u8>>>,
    snapshots: Mutex<HashMap<DocumentKey, BTreeMap<String, Vec<u8>>>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with [`StoreError::WriteRejected`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot_count(&self, key: DocumentKey) -> usize {
        self.snapshots.lock().get(&key).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn read(&self, key: DocumentKey) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.documents.lock().get(&key).cloned())
    }

    async fn write(&self, key: DocumentKey, bytes: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected);
        }
        self.documents.lock().insert(key, bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn snapshot(&self, key: DocumentKey, stamp: &str) -> Result<bool, StoreError> {
        let Some(current) = self.documents.lock().get(&key).cloned() else {
            return Ok(false);
        };
        self.snapshots
            .lock()
            .entry(key)
            .or_default()
            .insert(stamp.to_string(), current);
        Ok(true)
    }

    async fn prune_snapshots(&self, key: DocumentKey, keep: usize) -> Result<usize, StoreError> {
        let mut snapshots = self.snapshots.lock();
        let Some(entries) = snapshots.get_mut(&key) else {
            return Ok(0);
        };
        let mut removed = 0;
        while entries.len() > keep {
            entries.pop_first();
            removed += 1;
        }
        Ok(removed)
    }
}

//! Durable storage contract behind the [`Store`](super::Store).

use crate::error::StoreError;
use async_trait::async_trait;
use std::fmt;

/// The two persisted documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKey {
    Users,
    System,
}

impl DocumentKey {
    pub const ALL: [DocumentKey; 2] = [DocumentKey::Users, DocumentKey::System];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::System => "system",
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whole-document byte storage.
///
/// Implementations only move bytes. Serialization, caching and locking are
/// handled by the `Store`, which calls a backend for one document at a time
/// while holding that document's lock.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Current bytes of `key`, or `None` if it was never written.
    async fn read(&self, key: DocumentKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace `key` atomically.
    async fn write(&self, key: DocumentKey, bytes: &[u8]) -> Result<(), StoreError>;

    /// Copy the current contents of `key` aside under `stamp`.
    /// Returns false when there was nothing to copy.
    async fn snapshot(&self, key: DocumentKey, stamp: &str) -> Result<bool, StoreError>;

    /// Delete all but the newest `keep` snapshots of `key`. Returns how many went.
    async fn prune_snapshots(&self, key: DocumentKey, keep: usize) -> Result<usize, StoreError>;
}

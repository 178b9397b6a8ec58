//! Cached, lock-guarded document persistence.
//!
//! Two documents are stored: "users" and "system". Each has its own async
//! lock that serializes every write-path read and every save, plus an
//! in-process cache with a bounded time-to-live for plain reads.
//!
//! Mutations go through [`Store::update`], which force-reloads the document
//! under its lock, applies a closure, and persists the whole document only
//! if the closure succeeded. A failed write leaves the cache untouched, so
//! later reads never observe a mutation that did not reach storage.

mod backend;
mod file;
mod memory;
mod redb;

pub use self::backend::{Backend, DocumentKey};
pub use self::file::JsonFileBackend;
pub use self::memory::MemoryBackend;
pub use self::redb::RedbBackend;

use crate::config::{StoreBackendKind, StoreConfig};
use crate::error::StoreError;
use crate::metrics;
use crate::state::{SystemDocument, UsersDocument};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// A document the store knows how to cache and persist.
pub trait Document: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {
    const KEY: DocumentKey;

    fn slot(store: &Store) -> &Slot<Self>;
}

impl Document for UsersDocument {
    const KEY: DocumentKey = DocumentKey::Users;

    fn slot(store: &Store) -> &Slot<Self> {
        &store.users
    }
}

impl Document for SystemDocument {
    const KEY: DocumentKey = DocumentKey::System;

    fn slot(store: &Store) -> &Slot<Self> {
        &store.system
    }
}

/// How stale a read may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve from cache while within the TTL.
    Cached,
    /// Always read durable storage.
    Force,
}

struct Cached<D> {
    doc: Arc<D>,
    loaded_at: Instant,
}

/// Per-document lock and cache.
pub struct Slot<D> {
    lock: Mutex<()>,
    cache: RwLock<Option<Cached<D>>>,
}

impl<D> Default for Slot<D> {
    fn default() -> Self {
        Self {
            lock: Mutex::new(()),
            cache: RwLock::new(None),
        }
    }
}

impl<D> Slot<D> {
    fn fresh(&self, ttl: Duration) -> Option<Arc<D>> {
        let cache = self.cache.read();
        cache
            .as_ref()
            .filter(|c| c.loaded_at.elapsed() < ttl)
            .map(|c| Arc::clone(&c.doc))
    }

    fn set(&self, doc: Arc<D>) {
        *self.cache.write() = Some(Cached {
            doc,
            loaded_at: Instant::now(),
        });
    }
}

pub struct Store {
    backend: Arc<dyn Backend>,
    ttl: Duration,
    max_backups: usize,
    users: Slot<UsersDocument>,
    system: Slot<SystemDocument>,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>, ttl: Duration, max_backups: usize) -> Self {
        Self {
            backend,
            ttl,
            max_backups,
            users: Slot::default(),
            system: Slot::default(),
        }
    }

    /// Build the backend selected in `config`.
    pub async fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let backend: Arc<dyn Backend> = match config.backend {
            StoreBackendKind::Json => {
                Arc::new(JsonFileBackend::open(&config.path, config.backup_path()).await?)
            }
            StoreBackendKind::Redb => Arc::new(RedbBackend::open(&config.path)?),
            StoreBackendKind::Memory => Arc::new(MemoryBackend::new()),
        };
        info!(backend = backend.name(), path = %config.path, "document store ready");
        Ok(Self::new(backend, config.cache_ttl(), config.max_backups))
    }

    /// In-memory store, mainly for tests.
    pub fn in_memory() -> (Self, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = Self::new(backend.clone(), Duration::from_secs(30), 20);
        (store, backend)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Read a document.
    ///
    /// A cache miss or [`Freshness::Force`] reads storage under the
    /// document lock and refreshes the cache.
    pub async fn load<D: Document>(&self, freshness: Freshness) -> Result<Arc<D>, StoreError> {
        let slot = D::slot(self);
        if freshness == Freshness::Cached
            && let Some(doc) = slot.fresh(self.ttl)
        {
            return Ok(doc);
        }

        let _guard = slot.lock.lock().await;
        // Another task may have refreshed it while we waited.
        if freshness == Freshness::Cached
            && let Some(doc) = slot.fresh(self.ttl)
        {
            return Ok(doc);
        }
        let doc = Arc::new(self.read_locked::<D>().await?);
        slot.set(Arc::clone(&doc));
        Ok(doc)
    }

    /// Read-modify-write under the document lock.
    ///
    /// The closure sees a freshly loaded copy. If it returns `Err`, nothing
    /// is written. If the write fails, the cache keeps the previous version
    /// and the store error is returned.
    pub async fn update<D, R, E, F>(&self, f: F) -> Result<R, E>
    where
        D: Document,
        E: From<StoreError>,
        F: FnOnce(&mut D) -> Result<R, E>,
    {
        self.apply(f, false).await
    }

    /// Like [`Store::update`], but snapshots the stored version before it
    /// is overwritten. Used for destructive changes.
    pub async fn update_with_backup<D, R, E, F>(&self, f: F) -> Result<R, E>
    where
        D: Document,
        E: From<StoreError>,
        F: FnOnce(&mut D) -> Result<R, E>,
    {
        self.apply(f, true).await
    }

    async fn apply<D, R, E, F>(&self, f: F, backup: bool) -> Result<R, E>
    where
        D: Document,
        E: From<StoreError>,
        F: FnOnce(&mut D) -> Result<R, E>,
    {
        let slot = D::slot(self);
        let _guard = slot.lock.lock().await;

        let mut doc = self.read_locked::<D>().await?;
        let result = f(&mut doc)?;
        if backup {
            self.snapshot_locked(D::KEY).await;
        }
        self.write_locked(&doc).await?;
        slot.set(Arc::new(doc));
        Ok(result)
    }

    /// Snapshot every document and prune old snapshots.
    pub async fn snapshot_all(&self) -> Result<usize, StoreError> {
        let mut taken = 0;
        for key in DocumentKey::ALL {
            let guard = match key {
                DocumentKey::Users => self.users.lock.lock().await,
                DocumentKey::System => self.system.lock.lock().await,
            };
            let stamp = snapshot_stamp();
            if self.backend.snapshot(key, &stamp).await? {
                taken += 1;
            }
            drop(guard);
            let pruned = self.backend.prune_snapshots(key, self.max_backups).await?;
            if pruned > 0 {
                debug!(document = %key, pruned, "old snapshots pruned");
            }
        }
        Ok(taken)
    }

    async fn read_locked<D: Document>(&self) -> Result<D, StoreError> {
        match self.backend.read(D::KEY).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(D::default()),
        }
    }

    async fn write_locked<D: Document>(&self, doc: &D) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        if let Err(e) = self.backend.write(D::KEY, &bytes).await {
            error!(document = %D::KEY, backend = self.backend.name(), error = %e, "document write failed");
            metrics::record_persistence_failure(D::KEY.as_str());
            return Err(e);
        }
        Ok(())
    }

    /// Best-effort pre-write snapshot. Failure never blocks the save.
    async fn snapshot_locked(&self, key: DocumentKey) {
        let stamp = snapshot_stamp();
        if let Err(e) = self.backend.snapshot(key, &stamp).await {
            warn!(document = %key, error = %e, "pre-write snapshot failed");
            return;
        }
        if let Err(e) = self.backend.prune_snapshots(key, self.max_backups).await {
            warn!(document = %key, error = %e, "snapshot pruning failed");
        }
    }
}

fn snapshot_stamp() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

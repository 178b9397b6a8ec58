//! Keyed async lock registry.
//!
//! Locks are created lazily per key and shared by every component that
//! mutates the same user or (channel, user) pair. The registry is built
//! once at startup and handed to the components that need it.
//!
//! # Ordering
//!
//! `Verify` / `Purchase` locks are taken before the `User` lock, and
//! document locks inside [`crate::store::Store`] are taken last. Never
//! acquire a `User` lock while holding another `User` lock.

use super::dashmap_ext::DashMapExt;
use super::ids::{ChannelId, UserId};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// All mutations of one user's record.
    User(UserId),
    /// Verify attempts for one (channel, user) pair.
    Verify(ChannelId, UserId),
    /// Purchases by one owner for one channel ref.
    Purchase(UserId, String),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(u) => write!(f, "user:{u}"),
            Self::Verify(c, u) => write!(f, "verify:{c}:{u}"),
            Self::Purchase(u, r) => write!(f, "purchase:{u}:{r}"),
        }
    }
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    key: LockKey,
    _guard: OwnedMutexGuard<()>,
}

impl KeyGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// True if this guard serializes mutations of `user`.
    pub fn covers_user(&self, user: &UserId) -> bool {
        matches!(&self.key, LockKey::User(u) if u == user)
    }
}

#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle for `key`, created on first use.
    pub fn get_or_create(&self, key: &LockKey) -> Arc<Mutex<()>> {
        self.locks
            .get_or_insert_cloned(key, || Arc::new(Mutex::new(())))
    }

    /// Wait for and take the lock for `key`.
    pub async fn acquire(&self, key: LockKey) -> KeyGuard {
        let lock = self.get_or_create(&key);
        let guard = lock.lock_owned().await;
        KeyGuard { key, _guard: guard }
    }

    pub async fn lock_user(&self, user: &UserId) -> KeyGuard {
        self.acquire(LockKey::User(user.clone())).await
    }

    /// Drop locks nobody holds or waits on. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        // The map's own Arc accounts for one strong reference.
        let removed = self
            .locks
            .retain_counted(|_, lock| Arc::strong_count(lock) > 1);
        if removed > 0 {
            debug!(removed, remaining = self.locks.len(), "pruned idle locks");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

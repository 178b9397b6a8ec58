//! Per-user action cooldowns and transaction de-duplication.
//!
//! Gates whether a caller may attempt a mutation; it never mutates business
//! data itself. Each (user, action) pair gets a governor limiter with a
//! burst of one, so one call is allowed per configured window. Recently
//! seen transaction ids are kept so a replayed request is refused before
//! it reaches the ledger.
//!
//! All state sits behind a single mutex.

use crate::config::CooldownConfig;
use crate::metrics;
use crate::state::{TxId, UserId};
use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter as GovRateLimiter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

type DirectRateLimiter = governor::DefaultDirectRateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    JoinChannel,
    VerifyChannel,
    DailyGift,
    Store,
    Admin,
    General,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JoinChannel => "join_channel",
            Self::VerifyChannel => "verify_channel",
            Self::DailyGift => "daily_gift",
            Self::Store => "store",
            Self::Admin => "admin",
            Self::General => "general",
        }
    }

    fn window(&self, config: &CooldownConfig) -> f64 {
        match self {
            Self::JoinChannel => config.join_channel,
            Self::VerifyChannel => config.verify_channel,
            Self::DailyGift => config.daily_gift,
            Self::Store => config.store,
            Self::Admin => config.admin,
            Self::General => config.general,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`CooldownManager::can_proceed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Allowed,
    /// Denied; the pair may proceed after this long.
    Cooldown(Duration),
    /// The transaction id was already seen.
    Duplicate,
}

impl Gate {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Gate::Allowed)
    }

    pub fn remaining_secs(&self) -> f64 {
        match self {
            Gate::Cooldown(d) => d.as_secs_f64(),
            _ => 0.0,
        }
    }
}

struct Entry {
    limiter: DirectRateLimiter,
    last_seen: Instant,
}

#[derive(Default)]
struct Inner {
    limiters: HashMap<(UserId, ActionKind), Entry>,
    seen: HashMap<TxId, Instant>,
}

pub struct CooldownManager {
    inner: Mutex<Inner>,
    config: CooldownConfig,
}

impl CooldownManager {
    pub fn new(config: CooldownConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
        }
    }

    /// Check and, if allowed, consume one call for `(user, action)`.
    ///
    /// A seen `tx` is refused first, without touching the cooldown. A call
    /// denied by the cooldown does not record `tx`, so it can be retried.
    pub fn can_proceed(&self, user: &UserId, action: ActionKind, tx: Option<&TxId>) -> Gate {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if let Some(tx) = tx
            && inner.seen.contains_key(tx)
        {
            debug!(user = %user, action = %action, tx = %tx, "duplicate transaction refused");
            metrics::record_duplicate_transaction();
            return Gate::Duplicate;
        }

        let window = action.window(&self.config);
        if let Some(quota) = Duration::try_from_secs_f64(window)
            .ok()
            .and_then(Quota::with_period)
        {
            let entry = inner
                .limiters
                .entry((user.clone(), action))
                .or_insert_with(|| Entry {
                    limiter: GovRateLimiter::direct(quota),
                    last_seen: now,
                });
            entry.last_seen = now;
            if let Err(not_until) = entry.limiter.check() {
                let remaining = not_until.wait_time_from(DefaultClock::default().now());
                debug!(user = %user, action = %action, remaining_ms = remaining.as_millis() as u64, "cooldown active");
                metrics::record_cooldown_denial(action.as_str());
                return Gate::Cooldown(remaining);
            }
        }

        if let Some(tx) = tx {
            inner.seen.insert(tx.clone(), now);
        }
        Gate::Allowed
    }

    /// Forget `tx` so the same request may be retried, e.g. after the
    /// operation abstained or failed without effect.
    pub fn release(&self, tx: &TxId) {
        self.inner.lock().seen.remove(tx);
    }

    pub fn is_seen(&self, tx: &TxId) -> bool {
        self.inner.lock().seen.contains_key(tx)
    }

    /// Drop limiters and transaction ids older than the retention window.
    pub fn collect_garbage(&self) -> usize {
        self.collect_older_than(self.config.retention())
    }

    fn collect_older_than(&self, retention: Duration) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.limiters.len() + inner.seen.len();
        inner.limiters.retain(|_, e| e.last_seen.elapsed() < retention);
        inner.seen.retain(|_, at| at.elapsed() < retention);
        let removed = before - (inner.limiters.len() + inner.seen.len());
        if removed > 0 {
            debug!(removed, "cooldown entries collected");
        }
        removed
    }

    pub fn stats(&self) -> CooldownStats {
        let inner = self.inner.lock();
        CooldownStats {
            limiters: inner.limiters.len(),
            transactions: inner.seen.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownStats {
    pub limiters: usize,
    pub transactions: usize,
}

//! Idempotent points ledger.
//!
//! Every credit or debit carries a caller-supplied transaction id. The id is
//! looked up in the user's transaction log before the delta is applied, both
//! optimistically against the cached document and again inside the
//! read-modify-write, so a replay never changes the balance twice.
//!
//! Debits may drive a balance negative. Callers that need "sufficient
//! funds" check it themselves before debiting.

use crate::config::RewardsConfig;
use crate::error::{ExchangeError, ExchangeResult};
use crate::metrics;
use crate::state::{
    KeyGuard, LockRegistry, SystemDocument, SystemStats, TransactionRecord, TxId, TxKind, UserId,
    UserRecord, UsersDocument,
};
use crate::store::{Freshness, Store};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const STATS_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Apply one ledger entry to a user record.
///
/// Pure with respect to storage; composite operations call this inside
/// their own [`Store::update`] closure so the entry commits together with
/// the rest of their change.
pub(crate) fn post(
    record: &mut UserRecord,
    tx: &TxId,
    kind: TxKind,
    amount: i64,
    reason: &str,
    now: DateTime<Utc>,
    max_log: usize,
) -> ExchangeResult<i64> {
    if amount <= 0 {
        return Err(ExchangeError::InvalidAmount(amount));
    }
    if record.has_transaction(tx) {
        return Err(ExchangeError::DuplicateTransaction(tx.clone()));
    }

    match kind {
        TxKind::Credit => {
            record.points += amount;
            record.total_earned += amount;
        }
        TxKind::Debit => {
            record.points -= amount;
            record.total_spent += amount;
        }
    }
    record.transactions.push(TransactionRecord {
        id: tx.clone(),
        kind,
        amount,
        reason: reason.to_string(),
        timestamp: now,
    });
    if record.transactions.len() > max_log {
        let excess = record.transactions.len() - max_log;
        record.transactions.drain(..excess);
    }
    record.last_active = now;
    Ok(record.points)
}

/// Undo an entry posted by [`post`] and forget its id, so the same request
/// can be retried. Returns false if the id is not in the log.
pub(crate) fn reverse(record: &mut UserRecord, tx: &TxId) -> bool {
    let Some(pos) = record.transactions.iter().position(|t| &t.id == tx) else {
        return false;
    };
    let entry = record.transactions.remove(pos);
    match entry.kind {
        TxKind::Credit => {
            record.points -= entry.amount;
            record.total_earned -= entry.amount;
        }
        TxKind::Debit => {
            record.points += entry.amount;
            record.total_spent -= entry.amount;
        }
    }
    true
}

pub struct PointsLedger {
    store: Arc<Store>,
    locks: Arc<LockRegistry>,
    config: RewardsConfig,
}

impl PointsLedger {
    pub fn new(store: Arc<Store>, locks: Arc<LockRegistry>, config: RewardsConfig) -> Self {
        Self {
            store,
            locks,
            config,
        }
    }

    pub fn max_log(&self) -> usize {
        self.config.max_transactions_per_user
    }

    pub async fn credit(
        &self,
        user: &UserId,
        amount: i64,
        reason: &str,
        tx: &TxId,
    ) -> ExchangeResult<i64> {
        self.apply(user, TxKind::Credit, amount, reason, tx).await
    }

    /// Debit `amount`. The balance may go negative.
    pub async fn debit(
        &self,
        user: &UserId,
        amount: i64,
        reason: &str,
        tx: &TxId,
    ) -> ExchangeResult<i64> {
        self.apply(user, TxKind::Debit, amount, reason, tx).await
    }

    /// Current balance, served from cache. Unknown users have zero.
    pub async fn balance(&self, user: &UserId) -> ExchangeResult<i64> {
        let users = self.store.load::<UsersDocument>(Freshness::Cached).await?;
        Ok(users.get(user).map_or(0, |u| u.points))
    }

    async fn apply(
        &self,
        user: &UserId,
        kind: TxKind,
        amount: i64,
        reason: &str,
        tx: &TxId,
    ) -> ExchangeResult<i64> {
        if amount <= 0 {
            return Err(ExchangeError::InvalidAmount(amount));
        }

        // Cheap replay check before queueing on the user lock.
        let cached = self.store.load::<UsersDocument>(Freshness::Cached).await?;
        if cached.get(user).is_some_and(|u| u.has_transaction(tx)) {
            debug!(user = %user, tx = %tx, "replayed transaction refused");
            metrics::record_duplicate_transaction();
            return Err(ExchangeError::DuplicateTransaction(tx.clone()));
        }
        drop(cached);

        let guard = self.locks.lock_user(user).await;
        self.apply_held(&guard, user, kind, amount, reason, tx).await
    }

    /// Apply an entry while the caller already holds `user`'s lock.
    pub(crate) async fn apply_held(
        &self,
        guard: &KeyGuard,
        user: &UserId,
        kind: TxKind,
        amount: i64,
        reason: &str,
        tx: &TxId,
    ) -> ExchangeResult<i64> {
        debug_assert!(guard.covers_user(user), "held lock {} is not {user}'s", guard.key());
        let now = Utc::now();
        let max_log = self.max_log();

        let balance = self
            .store
            .update::<UsersDocument, _, ExchangeError, _>(|doc| {
                post(doc.entry(user, now), tx, kind, amount, reason, now, max_log)
            })
            .await
            .inspect_err(|e| {
                if matches!(e, ExchangeError::DuplicateTransaction(_)) {
                    metrics::record_duplicate_transaction();
                }
            })?;

        info!(user = %user, tx = %tx, ?kind, amount, balance, reason, "ledger entry posted");

        let delta = match kind {
            TxKind::Credit => amount,
            TxKind::Debit => -amount,
        };
        self.fold_into_stats(|stats| stats.total_points += delta).await;
        Ok(balance)
    }

    /// Best-effort aggregate update with bounded retry. Never fails the
    /// caller: the per-user balance is already committed.
    pub(crate) async fn fold_into_stats<F>(&self, f: F) -> bool
    where
        F: Fn(&mut SystemStats) + Send + Sync,
    {
        let attempts = self.config.stats_retry_attempts.max(1);
        for attempt in 1..=attempts {
            let result = self
                .store
                .update::<SystemDocument, _, ExchangeError, _>(|doc| {
                    f(&mut doc.stats);
                    doc.stats.last_updated = Some(Utc::now());
                    Ok(())
                })
                .await;
            match result {
                Ok(()) => return true,
                Err(e) if attempt < attempts => {
                    debug!(attempt, error = %e, "stats update failed, retrying");
                    tokio::time::sleep(STATS_RETRY_DELAY).await;
                }
                Err(e) => {
                    warn!(attempts, error = %e, "stats update abandoned");
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;

    fn ledger() -> (PointsLedger, Arc<Store>, Arc<MemoryBackend>) {
        let (store, backend) = Store::in_memory();
        let store = Arc::new(store);
        let ledger = PointsLedger::new(
            Arc::clone(&store),
            Arc::new(LockRegistry::new()),
            RewardsConfig::default(),
        );
        (ledger, store, backend)
    }

    #[tokio::test]
    async fn duplicate_credit_applies_once() {
        let (ledger, _, _) = ledger();
        let user = UserId::new("u");
        let tx = TxId::new("tx1");

        assert_eq!(ledger.credit(&user, 5, "reward", &tx).await.unwrap(), 5);
        assert!(matches!(
            ledger.credit(&user, 5, "reward", &tx).await,
            Err(ExchangeError::DuplicateTransaction(_))
        ));
        assert_eq!(ledger.balance(&user).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn debit_may_go_negative() {
        let (ledger, store, _) = ledger();
        let user = UserId::new("u");
        ledger.credit(&user, 2, "seed", &TxId::new("a")).await.unwrap();
        assert_eq!(ledger.debit(&user, 5, "penalty", &TxId::new("b")).await.unwrap(), -3);

        let users = store.load::<UsersDocument>(Freshness::Force).await.unwrap();
        let record = users.get(&user).unwrap();
        assert_eq!(record.total_earned, 2);
        assert_eq!(record.total_spent, 5);
        assert_eq!(record.transactions.len(), 2);
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let (ledger, _, backend) = ledger();
        let user = UserId::new("u");
        assert!(matches!(
            ledger.credit(&user, 0, "x", &TxId::new("a")).await,
            Err(ExchangeError::InvalidAmount(0))
        ));
        assert!(matches!(
            ledger.debit(&user, -4, "x", &TxId::new("b")).await,
            Err(ExchangeError::InvalidAmount(-4))
        ));
        assert_eq!(backend.write_count(), 0);
    }

    #[tokio::test]
    async fn persistence_failure_is_surfaced_and_balance_unchanged() {
        let (ledger, _, backend) = ledger();
        let user = UserId::new("u");
        ledger.credit(&user, 3, "seed", &TxId::new("a")).await.unwrap();

        backend.fail_writes(true);
        assert!(matches!(
            ledger.credit(&user, 3, "more", &TxId::new("b")).await,
            Err(ExchangeError::PersistenceFailure(_))
        ));
        backend.fail_writes(false);
        assert_eq!(ledger.balance(&user).await.unwrap(), 3);

        // The failed id was never recorded, so a retry succeeds.
        assert_eq!(ledger.credit(&user, 3, "more", &TxId::new("b")).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn stats_track_points_in_circulation() {
        let (ledger, store, _) = ledger();
        ledger.credit(&UserId::new("a"), 10, "x", &TxId::new("1")).await.unwrap();
        ledger.debit(&UserId::new("b"), 4, "y", &TxId::new("2")).await.unwrap();
        let system = store.load::<SystemDocument>(Freshness::Force).await.unwrap();
        assert_eq!(system.stats.total_points, 6);
    }

    #[test]
    fn log_is_trimmed_and_reverse_restores_balance() {
        let now = Utc::now();
        let mut record = UserRecord::new(now);
        for i in 0..5 {
            post(&mut record, &TxId::new(format!("t{i}")), TxKind::Credit, 1, "x", now, 3).unwrap();
        }
        assert_eq!(record.points, 5);
        assert_eq!(record.transactions.len(), 3);
        assert!(!record.has_transaction(&TxId::new("t0")));

        assert!(reverse(&mut record, &TxId::new("t4")));
        assert_eq!(record.points, 4);
        assert_eq!(record.total_earned, 4);
        assert!(!reverse(&mut record, &TxId::new("t4")));
    }
}

//! The exchange: entry points consumed by the dispatch layer.
//!
//! [`Exchange`] wires the store, lock registry, cooldowns, ledger, channel
//! registry and membership tracker together. Every entry point passes the
//! cooldown gate first; a transaction id recorded by the gate is released
//! again if the operation fails, so the caller can retry with the same id.

mod admin;
pub mod eligibility;
pub mod events;
pub mod ledger;
pub mod membership;
mod purchase;
mod referral;
pub mod registry;
mod rewards;

pub use admin::AdminChange;
pub use eligibility::{Eligibility, EligibilityInput, Ineligible};
pub use events::{EventBus, ExchangeEvent};
pub use ledger::PointsLedger;
pub use membership::{JoinReceipt, JoinTicket, LeaveOutcome, MembershipTracker, TrackedMembership};
pub use purchase::{PurchaseReceipt, UnmanagedSweep};
pub use referral::{ReferralReceipt, Registration};
pub use registry::{ChannelRegistry, ChannelStats, Deletion, RepairReport};
pub use rewards::{DailyGiftReceipt, RedeemReceipt};

use crate::config::Config;
use crate::error::{ExchangeError, ExchangeResult};
use crate::metrics;
use crate::oracle::MembershipOracle;
use crate::security::{ActionKind, CooldownManager, Gate};
use crate::state::{Channel, ChannelId, LockRegistry, TxId, UserId};
use crate::store::Store;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

pub struct Exchange {
    config: Config,
    store: Arc<Store>,
    locks: Arc<LockRegistry>,
    cooldowns: CooldownManager,
    ledger: Arc<PointsLedger>,
    registry: Arc<ChannelRegistry>,
    tracker: MembershipTracker,
    oracle: Arc<dyn MembershipOracle>,
    events: EventBus,
}

impl Exchange {
    pub fn new(config: Config, store: Arc<Store>, oracle: Arc<dyn MembershipOracle>) -> Self {
        let locks = Arc::new(LockRegistry::new());
        let events = EventBus::new();
        let ledger = Arc::new(PointsLedger::new(
            Arc::clone(&store),
            Arc::clone(&locks),
            config.rewards.clone(),
        ));
        let registry = Arc::new(ChannelRegistry::new(
            Arc::clone(&store),
            events.clone(),
            config.channels.clone(),
        ));
        let tracker = MembershipTracker::new(
            Arc::clone(&store),
            Arc::clone(&locks),
            Arc::clone(&ledger),
            Arc::clone(&registry),
            Arc::clone(&oracle),
            events.clone(),
            config.rewards.clone(),
        );
        let cooldowns = CooldownManager::new(config.cooldowns.clone());

        Self {
            config,
            store,
            locks,
            cooldowns,
            ledger,
            registry,
            tracker,
            oracle,
            events,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn cooldowns(&self) -> &CooldownManager {
        &self.cooldowns
    }

    pub fn ledger(&self) -> &PointsLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &MembershipTracker {
        &self.tracker
    }

    pub fn oracle(&self) -> &Arc<dyn MembershipOracle> {
        &self.oracle
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.events.subscribe()
    }

    /// Preview a join. No state changes.
    pub async fn request_join(&self, user: &UserId, channel: &ChannelId) -> ExchangeResult<JoinTicket> {
        self.gate(user, ActionKind::JoinChannel, None)?;
        observe("request_join", self.tracker.request_join(user, channel).await)
    }

    pub async fn verify_join(
        &self,
        user: &UserId,
        channel: &ChannelId,
        tx: &TxId,
    ) -> ExchangeResult<JoinReceipt> {
        self.gate(user, ActionKind::VerifyChannel, Some(tx))?;
        let result = self.tracker.verify_join(user, channel, tx).await;
        self.settle(tx, &result);
        observe("verify_join", result)
    }

    /// Leave handling as driven by reconciliation. Not rate limited.
    pub async fn mark_left(&self, user: &UserId, channel: &ChannelId) -> ExchangeResult<LeaveOutcome> {
        observe("mark_left", self.tracker.mark_left(user, channel).await)
    }

    pub async fn reactivate_channel(&self, channel: &ChannelId, new_required: u32) -> ExchangeResult<u32> {
        observe("reactivate_channel", self.registry.reactivate(channel, new_required).await)
    }

    pub async fn balance(&self, user: &UserId) -> ExchangeResult<i64> {
        self.ledger.balance(user).await
    }

    pub async fn available_channels(&self, user: &UserId) -> ExchangeResult<Vec<Channel>> {
        self.tracker.available_channels(user).await
    }

    fn gate(&self, user: &UserId, action: ActionKind, tx: Option<&TxId>) -> ExchangeResult<()> {
        match self.cooldowns.can_proceed(user, action, tx) {
            Gate::Allowed => Ok(()),
            Gate::Cooldown(remaining) => Err(ExchangeError::RateLimited(remaining)),
            Gate::Duplicate => Err(ExchangeError::DuplicateTransaction(
                tx.cloned().unwrap_or_else(TxId::generate),
            )),
        }
    }

    /// Forget `tx` at the gate unless the operation took effect.
    fn settle<T>(&self, tx: &TxId, result: &ExchangeResult<T>) {
        if let Err(e) = result
            && !matches!(e, ExchangeError::DuplicateTransaction(_))
        {
            debug!(tx = %tx, error = %e, "releasing transaction id");
            self.cooldowns.release(tx);
        }
    }
}

fn observe<T>(operation: &'static str, result: ExchangeResult<T>) -> ExchangeResult<T> {
    if let Err(e) = &result {
        metrics::record_operation_error(operation, e.error_code());
    }
    result
}

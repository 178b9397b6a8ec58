//! Channel purchases.
//!
//! An owner pays `required * price_per_member` to start a collection round.
//! Buying again for a ref whose previous channel completed reactivates that
//! channel instead of creating a second one. Collecting channels whose bot
//! lost admin rights are removed and their running order refunded.

use super::Exchange;
use super::ledger;
use crate::error::{ExchangeError, ExchangeResult};
use crate::metrics;
use crate::oracle::{self, BotStatus};
use crate::security::ActionKind;
use crate::state::{
    Channel, ChannelId, LockKey, Order, SystemDocument, TxId, TxKind, UserId, UsersDocument,
};
use crate::store::Freshness;
use chrono::Utc;
use tracing::{debug, error, info, warn};

const MIN_REF_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseReceipt {
    pub channel: ChannelId,
    pub channel_ref: String,
    pub round: u32,
    pub price: i64,
    pub balance: i64,
    /// An existing completed channel was reused.
    pub reactivated: bool,
}

fn validate_ref(channel_ref: &str) -> ExchangeResult<String> {
    let normalized = oracle::normalize_ref(channel_ref);
    let valid = normalized.len() >= MIN_REF_LEN
        && normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(normalized)
    } else {
        Err(ExchangeError::InvalidChannelRef(channel_ref.to_string()))
    }
}

/// Outcome of [`Exchange::remove_unmanaged_channels`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnmanagedSweep {
    pub checked: usize,
    pub removed: usize,
    pub refunded: usize,
    /// Oracle answered UNKNOWN; the channel was left alone.
    pub abstained: usize,
}

/// Where the purchased round will run.
enum Target {
    New(ChannelId),
    Reactivate { id: ChannelId, round: u32 },
}

impl Exchange {
    pub async fn purchase_channel(
        &self,
        owner: &UserId,
        channel_ref: &str,
        required: u32,
        tx: &TxId,
    ) -> ExchangeResult<PurchaseReceipt> {
        self.gate(owner, ActionKind::Store, Some(tx))?;
        let result = self.purchase_inner(owner, channel_ref, required, tx).await;
        self.settle(tx, &result);
        super::observe("purchase_channel", result)
    }

    async fn purchase_inner(
        &self,
        owner: &UserId,
        channel_ref: &str,
        required: u32,
        tx: &TxId,
    ) -> ExchangeResult<PurchaseReceipt> {
        if required == 0 {
            return Err(ExchangeError::InvalidAmount(0));
        }
        let channel_ref = validate_ref(channel_ref)?;

        let _purchase = self
            .locks
            .acquire(LockKey::Purchase(owner.clone(), channel_ref.clone()))
            .await;

        let system = self.store.load::<SystemDocument>(Freshness::Force).await?;
        if system.is_banned(owner) {
            return Err(ExchangeError::UserBanned);
        }
        let target = match system.find_owned(owner, &channel_ref) {
            Some(existing) if !existing.completed => {
                return Err(ExchangeError::ChannelAlreadyActive(channel_ref));
            }
            Some(existing) => Target::Reactivate {
                id: existing.id.clone(),
                round: existing.round + 1,
            },
            None => Target::New(ChannelId::generate()),
        };
        drop(system);

        match self.oracle.check_bot_admin(&channel_ref).await {
            BotStatus::Admin => {}
            BotStatus::NotAdmin => return Err(ExchangeError::BotNotAdmin(channel_ref)),
            BotStatus::Unknown => {
                warn!(owner = %owner, channel_ref = %channel_ref, "oracle abstained, purchase refused");
                metrics::record_oracle_abstention("purchase");
                return Err(ExchangeError::OracleUnknown);
            }
        }

        let price = self.config.rewards.price_for(required);
        let (channel_id, round) = match &target {
            Target::New(id) => (id.clone(), 0),
            Target::Reactivate { id, round } => (id.clone(), *round),
        };

        let guard = self.locks.lock_user(owner).await;
        let max_log = self.ledger.max_log();
        let now = Utc::now();
        let reason = format!("purchase:{channel_ref}");

        let balance = self
            .store
            .update::<UsersDocument, _, ExchangeError, _>(|doc| {
                let record = doc.entry(owner, now);
                if record.has_transaction(tx) {
                    return Err(ExchangeError::DuplicateTransaction(tx.clone()));
                }
                if record.points < price {
                    return Err(ExchangeError::InsufficientBalance {
                        needed: price,
                        available: record.points,
                    });
                }
                let balance = ledger::post(record, tx, TxKind::Debit, price, &reason, now, max_log)?;
                record.orders.push(Order {
                    channel: channel_id.clone(),
                    channel_ref: channel_ref.clone(),
                    required,
                    price,
                    round,
                    tx: tx.clone(),
                    created_at: now,
                });
                Ok(balance)
            })
            .await?;

        let placed = match &target {
            Target::New(id) => {
                self.registry
                    .create(Channel::new(id.clone(), owner.clone(), &channel_ref, required, now))
                    .await
            }
            Target::Reactivate { id, .. } => self.registry.reactivate(id, required).await.map(|_| ()),
        };
        if let Err(e) = placed {
            warn!(owner = %owner, channel = %channel_id, error = %e, "channel not placed, refunding");
            self.refund(owner, tx, price).await;
            return Err(e);
        }
        drop(guard);

        let reactivated = matches!(target, Target::Reactivate { .. });
        self.ledger
            .fold_into_stats(|stats| {
                stats.total_points -= price;
                stats.total_purchases += 1;
            })
            .await;
        info!(
            owner = %owner,
            channel = %channel_id,
            channel_ref = %channel_ref,
            required,
            price,
            round,
            reactivated,
            "channel purchased"
        );

        Ok(PurchaseReceipt {
            channel: channel_id,
            channel_ref,
            round,
            price,
            balance,
            reactivated,
        })
    }

    /// Delete every collecting channel the bot no longer administers and
    /// refund the order that paid for its running round.
    pub async fn remove_unmanaged_channels(&self) -> ExchangeResult<UnmanagedSweep> {
        let system = self.store.load::<SystemDocument>(Freshness::Force).await?;
        let candidates: Vec<(ChannelId, String, UserId, u32)> = system
            .channels
            .values()
            .filter(|ch| !ch.completed)
            .map(|ch| (ch.id.clone(), ch.channel_ref.clone(), ch.owner.clone(), ch.round))
            .collect();
        drop(system);

        let mut report = UnmanagedSweep::default();
        for (id, channel_ref, owner, round) in candidates {
            report.checked += 1;
            match self.oracle.check_bot_admin(&channel_ref).await {
                BotStatus::Admin => continue,
                BotStatus::Unknown => {
                    report.abstained += 1;
                    metrics::record_oracle_abstention("bot_admin_sweep");
                    continue;
                }
                BotStatus::NotAdmin => {}
            }

            let deleted = self
                .registry
                .delete_if(&id, "bot_not_admin", |ch| {
                    if ch.completed || ch.round != round {
                        Err(ExchangeError::StaleRound)
                    } else {
                        Ok(())
                    }
                })
                .await;
            match deleted {
                Ok(_) => {}
                Err(ExchangeError::StaleRound | ExchangeError::ChannelNotFound(_)) => {
                    debug!(channel = %id, "channel changed before removal, skipped");
                    continue;
                }
                Err(e) => return Err(e),
            }
            report.removed += 1;
            metrics::record_unmanaged_removal();
            warn!(channel = %id, channel_ref = %channel_ref, owner = %owner, round, "bot lost admin rights, channel removed");

            match self.refund_order(&owner, &id, round).await {
                Ok(true) => report.refunded += 1,
                Ok(false) => {}
                Err(e) => error!(owner = %owner, channel = %id, error = %e, "order refund failed"),
            }
        }
        Ok(report)
    }

    /// Refund and drop the order that paid for `round` of `channel`.
    /// Returns false if there is none, e.g. for channels created by an admin.
    async fn refund_order(&self, owner: &UserId, channel: &ChannelId, round: u32) -> ExchangeResult<bool> {
        let matches = |o: &Order| &o.channel == channel && o.round == round;
        let users = self.store.load::<UsersDocument>(Freshness::Force).await?;
        if !users.get(owner).is_some_and(|u| u.orders.iter().any(matches)) {
            return Ok(false);
        }
        drop(users);

        let _guard = self.locks.lock_user(owner).await;
        let max_log = self.ledger.max_log();
        let refunded = self
            .store
            .update::<UsersDocument, _, ExchangeError, _>(|doc| {
                let now = Utc::now();
                let record = doc.entry(owner, now);
                let pos = record
                    .orders
                    .iter()
                    .position(matches)
                    .ok_or(ExchangeError::NotTracked)?;
                let order = record.orders.remove(pos);
                let tx = order.tx.derive("refund");
                ledger::post(record, &tx, TxKind::Credit, order.price, "refund:bot_not_admin", now, max_log)?;
                Ok(order.price)
            })
            .await;
        let price = match refunded {
            Ok(price) => price,
            Err(ExchangeError::NotTracked | ExchangeError::DuplicateTransaction(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        self.ledger
            .fold_into_stats(|stats| {
                stats.total_points += price;
                stats.total_refunds += 1;
            })
            .await;
        info!(owner = %owner, channel = %channel, round, price, "order refunded");
        Ok(true)
    }

    /// Credit back a purchase debit and drop its order. Caller holds the
    /// owner's lock.
    async fn refund(&self, owner: &UserId, tx: &TxId, price: i64) {
        let refund_tx = tx.derive("refund");
        let max_log = self.ledger.max_log();
        let result = self
            .store
            .update::<UsersDocument, _, ExchangeError, _>(|doc| {
                let now = Utc::now();
                let record = doc.entry(owner, now);
                ledger::post(record, &refund_tx, TxKind::Credit, price, "refund", now, max_log)?;
                record.orders.retain(|o| &o.tx != tx);
                Ok(())
            })
            .await;
        if let Err(e) = result {
            error!(owner = %owner, tx = %refund_tx, error = %e, "purchase refund failed");
        }
    }
}

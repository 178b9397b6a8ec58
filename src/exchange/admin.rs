//! Administration: admin and ban sets, channel removal, stats.

use super::Exchange;
use super::registry::{ChannelStats, Deletion};
use crate::error::{ExchangeError, ExchangeResult};
use crate::metrics;
use crate::security::ActionKind;
use crate::state::{ChannelId, SystemDocument, TxId, UserId};
use crate::store::Freshness;
use tracing::info;

/// A change to the admin or ban set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminChange {
    Grant,
    Revoke,
    Ban,
    Unban,
}

impl AdminChange {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Grant => "grant",
            Self::Revoke => "revoke",
            Self::Ban => "ban",
            Self::Unban => "unban",
        }
    }
}

impl Exchange {
    /// Startup work: recount the aggregate stats, seed configured admins
    /// and publish the initial active-channel gauge. Returns the number of
    /// admins added.
    pub async fn bootstrap(&self) -> ExchangeResult<usize> {
        let (users, points) = self.registry.recount_stats().await?;
        info!(users, points, "aggregate stats recounted");

        let seeds: Vec<UserId> = self
            .config
            .admin
            .admins
            .iter()
            .map(|a| UserId::new(a.as_str()))
            .collect();

        let system = self.store.load::<SystemDocument>(Freshness::Force).await?;
        let missing = seeds.iter().any(|a| !system.admins.contains(a));
        let active = system.active_channel_count();
        drop(system);
        metrics::set_active_channels(active);
        if !missing {
            return Ok(0);
        }

        let added = self
            .store
            .update::<SystemDocument, _, ExchangeError, _>(|doc| {
                Ok(seeds.into_iter().filter(|a| doc.admins.insert(a.clone())).count())
            })
            .await?;
        info!(added, "configured admins seeded");
        Ok(added)
    }

    pub async fn is_admin(&self, user: &UserId) -> ExchangeResult<bool> {
        let system = self.store.load::<SystemDocument>(Freshness::Cached).await?;
        Ok(system.admins.contains(user))
    }

    /// Apply `change` to `target` on behalf of `actor`, who must be an admin.
    /// Returns false if the set already had the requested shape.
    pub async fn admin_change(
        &self,
        actor: &UserId,
        target: &UserId,
        change: AdminChange,
    ) -> ExchangeResult<bool> {
        self.gate(actor, ActionKind::Admin, None)?;
        let result = self
            .store
            .update::<SystemDocument, _, ExchangeError, _>(|doc| {
                if !doc.admins.contains(actor) {
                    return Err(ExchangeError::NotPermitted);
                }
                Ok(match change {
                    AdminChange::Grant => doc.admins.insert(target.clone()),
                    AdminChange::Revoke if actor == target => return Err(ExchangeError::NotPermitted),
                    AdminChange::Revoke => doc.admins.remove(target),
                    AdminChange::Ban if doc.admins.contains(target) => {
                        return Err(ExchangeError::NotPermitted);
                    }
                    AdminChange::Ban => doc.banned_users.insert(target.clone()),
                    AdminChange::Unban => doc.banned_users.remove(target),
                })
            })
            .await;
        if let Ok(changed) = result {
            info!(actor = %actor, target = %target, change = change.as_str(), changed, "admin change");
        }
        super::observe("admin_change", result)
    }

    pub async fn delete_channel(
        &self,
        actor: &UserId,
        channel: &ChannelId,
        reason: &str,
    ) -> ExchangeResult<Deletion> {
        self.gate(actor, ActionKind::Admin, None)?;
        if !self.is_admin(actor).await? {
            return Err(ExchangeError::NotPermitted);
        }
        let reason = format!("admin:{actor}:{reason}");
        super::observe("delete_channel", self.registry.delete(channel, &reason).await)
    }

    /// Grant (`delta > 0`) or take (`delta < 0`) points from `user` on
    /// behalf of `actor`. The cooldown applies to the acting admin.
    pub async fn admin_adjust_points(
        &self,
        actor: &UserId,
        user: &UserId,
        delta: i64,
        reason: &str,
        tx: &TxId,
    ) -> ExchangeResult<i64> {
        self.gate(actor, ActionKind::Admin, Some(tx))?;
        let result = match (delta, self.is_admin(actor).await) {
            (0, _) => Err(ExchangeError::InvalidAmount(0)),
            (_, Err(e)) => Err(e),
            (_, Ok(false)) => Err(ExchangeError::NotPermitted),
            (d, Ok(true)) if d > 0 => self.ledger.credit(user, d, reason, tx).await,
            (d, Ok(true)) => self.ledger.debit(user, d.saturating_neg(), reason, tx).await,
        };
        if let Ok(balance) = &result {
            info!(actor = %actor, user = %user, delta, balance, "points adjusted");
        }
        self.settle(tx, &result);
        super::observe("admin_adjust_points", result)
    }

    pub async fn channel_stats(&self, channel: &ChannelId) -> ExchangeResult<ChannelStats> {
        self.registry.stats(channel).await
    }
}

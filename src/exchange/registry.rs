//! Channel registry.
//!
//! Owns the channel map in the "system" document. Every transition is a
//! single [`Store::update`], so channel mutations are serialized by the
//! system document lock and a transition either commits whole or not at
//! all. Events are published only after the commit.

use super::eligibility::{self, EligibilityInput};
use super::events::{EventBus, ExchangeEvent};
use crate::config::ChannelsConfig;
use crate::error::{ExchangeError, ExchangeResult};
use crate::metrics;
use crate::state::{
    Channel, ChannelId, DeletedChannel, JoinTransition, LeaveTransition, Membership, NotCompleted,
    SystemDocument, UserId, UsersDocument,
};
use crate::store::{Freshness, Store};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// A channel removed from the registry.
#[derive(Debug, Clone)]
pub struct Deletion {
    pub channel: Channel,
    pub memberships_purged: usize,
}

/// Counter snapshot for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStats {
    pub id: ChannelId,
    pub channel_ref: String,
    pub round: u32,
    pub current: u32,
    pub required: u32,
    pub percent: f64,
    pub completed: bool,
    pub joins: u32,
    pub leaves: u32,
    pub returns: u32,
}

impl From<&Channel> for ChannelStats {
    fn from(ch: &Channel) -> Self {
        Self {
            id: ch.id.clone(),
            channel_ref: ch.channel_ref.clone(),
            round: ch.round,
            current: ch.current,
            required: ch.required,
            percent: ch.progress_percent(),
            completed: ch.completed,
            joins: ch.round_stats.joins,
            leaves: ch.round_stats.leaves,
            returns: ch.round_stats.returns,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub channels_fixed: usize,
    pub orphan_memberships: usize,
    /// Sum of balances minus the recorded point total.
    pub points_drift: i64,
}

pub struct ChannelRegistry {
    store: Arc<Store>,
    events: EventBus,
    config: ChannelsConfig,
}

impl ChannelRegistry {
    pub fn new(store: Arc<Store>, events: EventBus, config: ChannelsConfig) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    pub async fn get(&self, id: &ChannelId, freshness: Freshness) -> ExchangeResult<Channel> {
        let system = self.store.load::<SystemDocument>(freshness).await?;
        system
            .channels
            .get(id)
            .cloned()
            .ok_or_else(|| ExchangeError::ChannelNotFound(id.clone()))
    }

    pub async fn list(&self, freshness: Freshness) -> ExchangeResult<Vec<Channel>> {
        let system = self.store.load::<SystemDocument>(freshness).await?;
        Ok(system.channels.values().cloned().collect())
    }

    pub async fn stats(&self, id: &ChannelId) -> ExchangeResult<ChannelStats> {
        let channel = self.get(id, Freshness::Cached).await?;
        Ok(ChannelStats::from(&channel))
    }

    /// Insert a new channel. Refused if its owner already has an active
    /// channel with the same ref.
    pub async fn create(&self, channel: Channel) -> ExchangeResult<()> {
        let active = self
            .store
            .update::<SystemDocument, _, ExchangeError, _>(|doc| {
                if let Some(existing) = doc.find_owned(&channel.owner, &channel.channel_ref)
                    && !existing.completed
                {
                    return Err(ExchangeError::ChannelAlreadyActive(channel.channel_ref.clone()));
                }
                info!(
                    channel = %channel.id,
                    owner = %channel.owner,
                    channel_ref = %channel.channel_ref,
                    required = channel.required,
                    "channel created"
                );
                doc.channels.insert(channel.id.clone(), channel);
                Ok(doc.active_channel_count())
            })
            .await?;
        metrics::set_active_channels(active);
        Ok(())
    }

    /// Count one verified join.
    pub async fn record_join(&self, id: &ChannelId) -> ExchangeResult<u32> {
        Ok(self.record_join_if(id, false, |_| Ok(())).await?.count)
    }

    /// Count one verified join after `check` accepts the channel's current
    /// state. `check` runs under the system document lock.
    pub async fn record_join_if<F>(
        &self,
        id: &ChannelId,
        returning: bool,
        check: F,
    ) -> ExchangeResult<JoinTransition>
    where
        F: FnOnce(&Channel) -> ExchangeResult<()>,
    {
        let now = Utc::now();
        let (transition, owner) = self
            .store
            .update::<SystemDocument, _, ExchangeError, _>(|doc| {
                let channel = doc
                    .channels
                    .get_mut(id)
                    .ok_or_else(|| ExchangeError::ChannelNotFound(id.clone()))?;
                check(channel)?;
                Ok((channel.apply_join(returning, now), channel.owner.clone()))
            })
            .await?;

        if transition.completed_now {
            info!(channel = %id, round = transition.round, count = transition.count, "channel completed");
            metrics::record_completion();
            self.events.publish(ExchangeEvent::ChannelCompleted {
                channel: id.clone(),
                owner,
                round: transition.round,
            });
        }
        Ok(transition)
    }

    /// Join gate used by verification: the channel must still be in
    /// `round` and the user must still be eligible against its live state.
    pub fn join_check<'a>(
        user: &'a UserId,
        round: u32,
        membership: Option<&'a Membership>,
    ) -> impl FnOnce(&Channel) -> ExchangeResult<()> + 'a {
        move |channel| {
            if channel.round != round {
                return Err(ExchangeError::StaleRound);
            }
            eligibility::evaluate(EligibilityInput::for_channel(channel, user), membership)
                .into_result()
                .map(|_| ())
        }
    }

    /// Count one leave. The counter is floored at zero.
    pub async fn record_leave(&self, id: &ChannelId, reason: &str) -> ExchangeResult<LeaveTransition> {
        self.record_leave_in_round(id, None, reason).await
    }

    /// Count one leave if the channel is still in `round`.
    pub async fn record_leave_in_round(
        &self,
        id: &ChannelId,
        round: Option<u32>,
        reason: &str,
    ) -> ExchangeResult<LeaveTransition> {
        let now = Utc::now();
        let transition = self
            .store
            .update::<SystemDocument, _, ExchangeError, _>(|doc| {
                let channel = doc
                    .channels
                    .get_mut(id)
                    .ok_or_else(|| ExchangeError::ChannelNotFound(id.clone()))?;
                if round.is_some_and(|r| r != channel.round) {
                    return Err(ExchangeError::StaleRound);
                }
                Ok(channel.apply_leave(reason, now))
            })
            .await?;

        if transition.uncompleted {
            info!(channel = %id, count = transition.count, required = transition.required, reason, "channel un-completed");
            self.events.publish(ExchangeEvent::ChannelUncompleted {
                channel: id.clone(),
                reason: reason.to_string(),
            });
        }
        Ok(transition)
    }

    /// Start a new round on a completed channel.
    pub async fn reactivate(&self, id: &ChannelId, new_required: u32) -> ExchangeResult<u32> {
        if new_required == 0 {
            return Err(ExchangeError::InvalidAmount(0));
        }
        let now = Utc::now();
        let (round, active) = self
            .store
            .update_with_backup::<SystemDocument, _, ExchangeError, _>(|doc| {
                let channel = doc
                    .channels
                    .get_mut(id)
                    .ok_or_else(|| ExchangeError::ChannelNotFound(id.clone()))?;
                let round = channel
                    .apply_reactivation(new_required, now)
                    .map_err(|NotCompleted| ExchangeError::ChannelNotCompleted)?;
                doc.stats.total_reactivations += 1;
                Ok((round, doc.active_channel_count()))
            })
            .await?;

        info!(channel = %id, round, required = new_required, "channel reactivated");
        metrics::record_reactivation();
        metrics::set_active_channels(active);
        self.events.publish(ExchangeEvent::ChannelReactivated {
            channel: id.clone(),
            round,
            required: new_required,
        });
        Ok(round)
    }

    /// Remove a channel and purge every membership that references it.
    pub async fn delete(&self, id: &ChannelId, reason: &str) -> ExchangeResult<Deletion> {
        self.delete_if(id, reason, |_| Ok(())).await
    }

    /// [`ChannelRegistry::delete`], refused with `check`'s error if the
    /// stored channel no longer qualifies.
    pub async fn delete_if<F>(&self, id: &ChannelId, reason: &str, check: F) -> ExchangeResult<Deletion>
    where
        F: FnOnce(&Channel) -> ExchangeResult<()>,
    {
        let now = Utc::now();
        let limit = self.config.deleted_history_limit;
        let (channel, active) = self
            .store
            .update_with_backup::<SystemDocument, _, ExchangeError, _>(|doc| {
                let current = doc
                    .channels
                    .get(id)
                    .ok_or_else(|| ExchangeError::ChannelNotFound(id.clone()))?;
                check(current)?;
                let channel = doc
                    .channels
                    .remove(id)
                    .ok_or_else(|| ExchangeError::ChannelNotFound(id.clone()))?;
                doc.push_deleted(DeletedChannel::of(&channel, reason, now), limit);
                Ok((channel, doc.active_channel_count()))
            })
            .await?;
        metrics::set_active_channels(active);

        let purged = self.purge_memberships(&[id.clone()]).await?;
        info!(channel = %id, reason, memberships = purged, "channel deleted");
        self.events.publish(ExchangeEvent::ChannelDeleted {
            channel: id.clone(),
            reason: reason.to_string(),
        });
        Ok(Deletion {
            channel,
            memberships_purged: purged,
        })
    }

    /// Delete channels that have stayed completed past the retention window.
    pub async fn sweep_completed(&self, now: DateTime<Utc>) -> ExchangeResult<Vec<Deletion>> {
        let cutoff = now - self.config.completed_retention();
        let limit = self.config.deleted_history_limit;
        let reason = "completed_retention";
        let expired = |c: &Channel| c.completed && c.completed_at.is_some_and(|at| at <= cutoff);

        let system = self.store.load::<SystemDocument>(Freshness::Force).await?;
        if !system.channels.values().any(|c| expired(c)) {
            return Ok(Vec::new());
        }
        drop(system);

        let removed = self
            .store
            .update_with_backup::<SystemDocument, _, ExchangeError, _>(|doc| {
                let expired: Vec<ChannelId> = doc
                    .channels
                    .values()
                    .filter(|c| expired(c))
                    .map(|c| c.id.clone())
                    .collect();
                let mut removed = Vec::with_capacity(expired.len());
                for id in expired {
                    if let Some(channel) = doc.channels.remove(&id) {
                        doc.push_deleted(DeletedChannel::of(&channel, reason, now), limit);
                        removed.push(channel);
                    }
                }
                Ok(removed)
            })
            .await?;
        if removed.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<ChannelId> = removed.iter().map(|c| c.id.clone()).collect();
        let purged = self.purge_memberships(&ids).await?;
        info!(channels = removed.len(), memberships = purged, "completed channels swept");

        let mut deletions = Vec::with_capacity(removed.len());
        for channel in removed {
            self.events.publish(ExchangeEvent::ChannelDeleted {
                channel: channel.id.clone(),
                reason: reason.to_string(),
            });
            deletions.push(Deletion {
                channel,
                memberships_purged: 0,
            });
        }
        if let Some(first) = deletions.first_mut() {
            // Purge is batched; the total is reported on the first entry.
            first.memberships_purged = purged;
        }
        Ok(deletions)
    }

    /// Restore channel invariants and drop memberships of vanished channels.
    ///
    /// Only memberships recorded before the channel set was read are
    /// considered orphans; a channel created after that read cannot have
    /// older members. Aggregate points are compared, not rewritten, since
    /// ledger deltas may still be on their way into the stats.
    pub async fn repair(&self, now: DateTime<Utc>) -> ExchangeResult<RepairReport> {
        let users = self.store.load::<UsersDocument>(Freshness::Force).await?;
        let user_count = users.users.len() as u64;
        let recounted = users.total_points();
        drop(users);

        let (channels_fixed, live, read_at, points_drift, active) = self
            .store
            .update::<SystemDocument, _, ExchangeError, _>(|doc| {
                let mut fixed = 0;
                for channel in doc.channels.values_mut() {
                    if channel.repair(now) {
                        warn!(channel = %channel.id, current = channel.current, required = channel.required, "repaired inconsistent channel");
                        fixed += 1;
                    }
                }
                doc.stats.total_users = user_count;
                doc.stats.last_updated = Some(now);
                let live: BTreeSet<ChannelId> = doc.channels.keys().cloned().collect();
                let drift = recounted - doc.stats.total_points;
                Ok((fixed, live, Utc::now(), drift, doc.active_channel_count()))
            })
            .await?;
        metrics::set_active_channels(active);
        if points_drift != 0 {
            warn!(drift = points_drift, "point total differs from the sum of balances");
        }

        let orphan_memberships = self
            .store
            .update::<UsersDocument, _, ExchangeError, _>(|doc| Ok(doc.prune_orphans(&live, read_at)))
            .await?;

        Ok(RepairReport {
            channels_fixed,
            orphan_memberships,
            points_drift,
        })
    }

    /// Rewrite the user and point totals from the users document.
    ///
    /// Must only run while no point mutation is in flight, e.g. at startup.
    pub async fn recount_stats(&self) -> ExchangeResult<(u64, i64)> {
        let users = self.store.load::<UsersDocument>(Freshness::Force).await?;
        let totals = (users.users.len() as u64, users.total_points());
        drop(users);
        self.store
            .update::<SystemDocument, _, ExchangeError, _>(|doc| {
                doc.stats.total_users = totals.0;
                doc.stats.total_points = totals.1;
                doc.stats.last_updated = Some(Utc::now());
                Ok(())
            })
            .await?;
        Ok(totals)
    }

    async fn purge_memberships(&self, ids: &[ChannelId]) -> ExchangeResult<usize> {
        self.store
            .update_with_backup::<UsersDocument, _, ExchangeError, _>(|doc| {
                Ok(ids.iter().map(|id| doc.purge_channel(id)).sum())
            })
            .await
    }
}

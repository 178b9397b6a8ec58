//! Join verification and leave handling.
//!
//! A verified join is three commits: the user's credit and membership (one
//! users-document update), then the channel counter (one system-document
//! update). If the second commit is refused, the first is compensated
//! under the same user lock before the lock is released, so no caller ever
//! observes a credit without a counted join.

use super::eligibility::{self, EligibilityInput};
use super::events::{EventBus, ExchangeEvent};
use super::ledger::{self, PointsLedger};
use super::registry::ChannelRegistry;
use crate::config::RewardsConfig;
use crate::error::{ExchangeError, ExchangeResult};
use crate::metrics;
use crate::oracle::{MembershipOracle, Subscription};
use crate::state::{
    Channel, ChannelId, LockKey, LockRegistry, Membership, SystemDocument, TxId, TxKind, UserId,
    UsersDocument,
};
use crate::store::{Freshness, Store};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a user is shown before confirming a join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinTicket {
    pub channel: ChannelId,
    pub channel_ref: String,
    pub round: u32,
    pub reward: i64,
    pub returning: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinReceipt {
    pub channel: ChannelId,
    pub round: u32,
    pub reward: i64,
    pub balance: i64,
    pub returning: bool,
    pub count: u32,
    pub required: u32,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaveOutcome {
    /// Left an active channel: counter dropped and a penalty was debited.
    Penalized {
        penalty: i64,
        balance: i64,
        count: u32,
        uncompleted: bool,
    },
    /// Left after the round had paid out. No penalty.
    LeftCompleted { round: u32 },
    /// The channel no longer exists; the stale record was dropped.
    ChannelGone,
}

/// One membership the reconciler should check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedMembership {
    pub user: UserId,
    pub channel: ChannelId,
    /// `None` if the channel has been deleted.
    pub channel_ref: Option<String>,
}

pub struct MembershipTracker {
    store: Arc<Store>,
    locks: Arc<LockRegistry>,
    ledger: Arc<PointsLedger>,
    registry: Arc<ChannelRegistry>,
    oracle: Arc<dyn MembershipOracle>,
    events: EventBus,
    rewards: RewardsConfig,
}

impl MembershipTracker {
    pub fn new(
        store: Arc<Store>,
        locks: Arc<LockRegistry>,
        ledger: Arc<PointsLedger>,
        registry: Arc<ChannelRegistry>,
        oracle: Arc<dyn MembershipOracle>,
        events: EventBus,
        rewards: RewardsConfig,
    ) -> Self {
        Self {
            store,
            locks,
            ledger,
            registry,
            oracle,
            events,
            rewards,
        }
    }

    /// Check eligibility against cached state. Nothing is changed.
    pub async fn request_join(&self, user: &UserId, channel: &ChannelId) -> ExchangeResult<JoinTicket> {
        let system = self.store.load::<SystemDocument>(Freshness::Cached).await?;
        if system.is_banned(user) {
            return Err(ExchangeError::UserBanned);
        }
        let ch = system
            .channels
            .get(channel)
            .ok_or_else(|| ExchangeError::ChannelNotFound(channel.clone()))?;

        let users = self.store.load::<UsersDocument>(Freshness::Cached).await?;
        let returning = eligibility::evaluate(
            EligibilityInput::for_channel(ch, user),
            users.membership(user, channel),
        )
        .into_result()?;

        Ok(JoinTicket {
            channel: channel.clone(),
            channel_ref: ch.channel_ref.clone(),
            round: ch.round,
            reward: self.rewards.join_reward,
            returning,
        })
    }

    /// Confirm a join with the oracle, credit the reward and count it.
    pub async fn verify_join(
        &self,
        user: &UserId,
        channel: &ChannelId,
        tx: &TxId,
    ) -> ExchangeResult<JoinReceipt> {
        let _verify = self
            .locks
            .acquire(LockKey::Verify(channel.clone(), user.clone()))
            .await;

        let system = self.store.load::<SystemDocument>(Freshness::Force).await?;
        if system.is_banned(user) {
            return Err(ExchangeError::UserBanned);
        }
        let ch = system
            .channels
            .get(channel)
            .cloned()
            .ok_or_else(|| ExchangeError::ChannelNotFound(channel.clone()))?;
        drop(system);

        let users = self.store.load::<UsersDocument>(Freshness::Force).await?;
        if users.get(user).is_some_and(|u| u.has_transaction(tx)) {
            metrics::record_duplicate_transaction();
            return Err(ExchangeError::DuplicateTransaction(tx.clone()));
        }
        eligibility::evaluate(
            EligibilityInput::for_channel(&ch, user),
            users.membership(user, channel),
        )
        .into_result()?;
        drop(users);

        match self.oracle.check_subscription(user, &ch.channel_ref).await {
            Subscription::Member => {}
            Subscription::NotMember => {
                debug!(user = %user, channel = %channel, "join refused, not subscribed");
                return Err(ExchangeError::NotSubscribed);
            }
            Subscription::Unknown => {
                warn!(user = %user, channel = %channel, "oracle abstained, join not verified");
                metrics::record_oracle_abstention("verify");
                return Err(ExchangeError::OracleUnknown);
            }
        }

        let guard = self.locks.lock_user(user).await;
        let reward = self.rewards.join_reward;
        let max_log = self.ledger.max_log();
        let now = Utc::now();
        let reason = format!("join:{channel}");

        // Credit and membership commit together, re-checked on fresh state.
        let (balance, previous, returning) = self
            .store
            .update::<UsersDocument, _, ExchangeError, _>(|doc| {
                let previous = doc.membership(user, channel).cloned();
                let returning = eligibility::evaluate(
                    EligibilityInput::for_channel(&ch, user),
                    previous.as_ref(),
                )
                .into_result()?;
                let record = doc.entry(user, now);
                let balance = ledger::post(record, tx, TxKind::Credit, reward, &reason, now, max_log)?;
                match record.joined_channels.get_mut(channel) {
                    Some(m) => m.rejoin(ch.round, tx.clone(), reward, now),
                    None => {
                        record
                            .joined_channels
                            .insert(channel.clone(), Membership::joined(ch.round, tx.clone(), reward, now));
                    }
                }
                Ok((balance, previous, returning))
            })
            .await?;

        let check = ChannelRegistry::join_check(user, ch.round, previous.as_ref());
        let counted = self.registry.record_join_if(channel, returning, check).await;
        let transition = match counted {
            Ok(t) => t,
            Err(e) => {
                warn!(user = %user, channel = %channel, error = %e, "join not counted, reverting credit");
                self.revert_join(user, channel, tx, previous).await;
                return Err(e);
            }
        };
        drop(guard);

        self.ledger
            .fold_into_stats(|stats| {
                stats.total_points += reward;
                stats.total_joins += 1;
            })
            .await;
        metrics::record_join(returning);
        info!(
            user = %user,
            channel = %channel,
            round = transition.round,
            count = transition.count,
            required = transition.required,
            returning,
            balance,
            "join verified"
        );
        self.events.publish(ExchangeEvent::UserJoined {
            user: user.clone(),
            channel: channel.clone(),
            returning,
        });

        Ok(JoinReceipt {
            channel: channel.clone(),
            round: transition.round,
            reward,
            balance,
            returning,
            count: transition.count,
            required: transition.required,
            completed: transition.count >= transition.required,
        })
    }

    async fn revert_join(
        &self,
        user: &UserId,
        channel: &ChannelId,
        tx: &TxId,
        previous: Option<Membership>,
    ) {
        let result = self
            .store
            .update::<UsersDocument, _, ExchangeError, _>(|doc| {
                let record = doc.entry(user, Utc::now());
                ledger::reverse(record, tx);
                match previous {
                    Some(m) => {
                        record.joined_channels.insert(channel.clone(), m);
                    }
                    None => {
                        record.joined_channels.remove(channel);
                    }
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            error!(user = %user, channel = %channel, tx = %tx, error = %e, "failed to revert uncounted join");
        }
    }

    /// Record that `user` is no longer subscribed to `channel`.
    ///
    /// Leaving an active round costs the leave penalty and drops the
    /// counter. Leaving a round that already paid out only marks the
    /// record so the same round cannot be joined again.
    pub async fn mark_left(&self, user: &UserId, channel: &ChannelId) -> ExchangeResult<LeaveOutcome> {
        let guard = self.locks.lock_user(user).await;
        let now = Utc::now();

        let system = self.store.load::<SystemDocument>(Freshness::Force).await?;
        let Some(ch) = system.channels.get(channel).cloned() else {
            drop(system);
            self.store
                .update::<UsersDocument, _, ExchangeError, _>(|doc| {
                    if let Some(record) = doc.users.get_mut(user) {
                        record.joined_channels.remove(channel);
                    }
                    Ok(())
                })
                .await?;
            debug!(user = %user, channel = %channel, "dropped membership of deleted channel");
            return Ok(LeaveOutcome::ChannelGone);
        };
        drop(system);

        let penalty = self.rewards.leave_penalty;
        let max_log = self.ledger.max_log();
        let reason = format!("leave:{channel}");

        let step = self
            .store
            .update::<UsersDocument, _, ExchangeError, _>(|doc| {
                let record = doc.users.get_mut(user).ok_or(ExchangeError::NotTracked)?;
                let m = record
                    .joined_channels
                    .get_mut(channel)
                    .filter(|m| m.is_active())
                    .ok_or(ExchangeError::NotTracked)?;

                // A join counted in an earlier round is not part of the
                // current counter.
                if ch.completed || m.round < ch.round {
                    let served = m.round.min(ch.round);
                    m.mark_left(now, true, served);
                    return Ok(LeaveStep::Completed(served));
                }

                let previous = m.clone();
                m.mark_left(now, false, ch.round);
                let penalty_tx = previous.join_tx.derive("penalty");
                let balance = ledger::post(record, &penalty_tx, TxKind::Debit, penalty, &reason, now, max_log)?;
                Ok(LeaveStep::Penalized {
                    previous,
                    penalty_tx,
                    balance,
                })
            })
            .await?;

        let (previous, penalty_tx, balance) = match step {
            LeaveStep::Completed(round) => {
                info!(user = %user, channel = %channel, round, "left completed round");
                return Ok(LeaveOutcome::LeftCompleted { round });
            }
            LeaveStep::Penalized {
                previous,
                penalty_tx,
                balance,
            } => (previous, penalty_tx, balance),
        };

        let leave_reason = format!("user_left:{user}");
        let counted = self
            .registry
            .record_leave_in_round(channel, Some(ch.round), &leave_reason)
            .await;
        let transition = match counted {
            Ok(t) => t,
            Err(e) => {
                warn!(user = %user, channel = %channel, error = %e, "leave not counted, reverting penalty");
                self.revert_leave(user, channel, &penalty_tx, previous).await;
                return Err(e);
            }
        };
        drop(guard);

        self.ledger
            .fold_into_stats(|stats| {
                stats.total_points -= penalty;
                stats.total_penalties += 1;
            })
            .await;
        metrics::record_penalty();
        info!(
            user = %user,
            channel = %channel,
            penalty,
            balance,
            count = transition.count,
            "left active channel, penalty applied"
        );
        self.events.publish(ExchangeEvent::UserPenalized {
            user: user.clone(),
            channel: channel.clone(),
            amount: penalty,
        });

        Ok(LeaveOutcome::Penalized {
            penalty,
            balance,
            count: transition.count,
            uncompleted: transition.uncompleted,
        })
    }

    async fn revert_leave(&self, user: &UserId, channel: &ChannelId, tx: &TxId, previous: Membership) {
        let result = self
            .store
            .update::<UsersDocument, _, ExchangeError, _>(|doc| {
                if let Some(record) = doc.users.get_mut(user) {
                    ledger::reverse(record, tx);
                    record.joined_channels.insert(channel.clone(), previous);
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            error!(user = %user, channel = %channel, tx = %tx, error = %e, "failed to revert uncounted leave");
        }
    }

    /// Channels `user` may join now, oldest first.
    pub async fn available_channels(&self, user: &UserId) -> ExchangeResult<Vec<Channel>> {
        let system = self.store.load::<SystemDocument>(Freshness::Cached).await?;
        if system.is_banned(user) {
            return Ok(Vec::new());
        }
        let users = self.store.load::<UsersDocument>(Freshness::Cached).await?;

        let mut channels: Vec<Channel> = system
            .channels
            .values()
            .filter(|ch| {
                eligibility::evaluate(
                    EligibilityInput::for_channel(ch, user),
                    users.membership(user, &ch.id),
                )
                .is_eligible()
            })
            .cloned()
            .collect();
        channels.sort_by_key(|ch| ch.created_at);
        Ok(channels)
    }

    /// Every verified, not-left membership.
    pub async fn active_memberships(&self) -> ExchangeResult<Vec<TrackedMembership>> {
        let system = self.store.load::<SystemDocument>(Freshness::Force).await?;
        let users = self.store.load::<UsersDocument>(Freshness::Force).await?;

        Ok(users
            .users
            .iter()
            .flat_map(|(user, record)| {
                record.active_memberships().map(|(channel, _)| TrackedMembership {
                    user: user.clone(),
                    channel: channel.clone(),
                    channel_ref: system.channels.get(channel).map(|c| c.channel_ref.clone()),
                })
            })
            .collect())
    }
}

enum LeaveStep {
    Completed(u32),
    Penalized {
        previous: Membership,
        penalty_tx: TxId,
        balance: i64,
    },
}

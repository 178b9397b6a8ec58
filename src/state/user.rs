//! User record as persisted in the "users" document.

use super::ids::{ChannelId, TxId, UserId};
use super::membership::Membership;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Credit,
    Debit,
}

/// Append-only ledger entry. Replay detection only; the balance is the
/// source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TxId,
    pub kind: TxKind,
    pub amount: i64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub channel: ChannelId,
    pub channel_ref: String,
    pub required: u32,
    pub price: i64,
    pub round: u32,
    pub tx: TxId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyGift {
    pub last_claimed: Option<DateTime<Utc>>,
    pub streak: u32,
    pub total_claimed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub points: i64,
    #[serde(default)]
    pub total_earned: i64,
    #[serde(default)]
    pub total_spent: i64,
    #[serde(default)]
    pub joined_channels: BTreeMap<ChannelId, Membership>,
    #[serde(default)]
    pub transactions: Vec<TransactionRecord>,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub daily_gift: DailyGift,
    #[serde(default)]
    pub referred_by: Option<UserId>,
    /// Users this user brought in whose referral was credited.
    #[serde(default)]
    pub invited_users: BTreeSet<UserId>,
    pub first_seen: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            points: 0,
            total_earned: 0,
            total_spent: 0,
            joined_channels: BTreeMap::new(),
            transactions: Vec::new(),
            orders: Vec::new(),
            daily_gift: DailyGift::default(),
            referred_by: None,
            invited_users: BTreeSet::new(),
            first_seen: now,
            last_active: now,
        }
    }

    pub fn has_transaction(&self, tx: &TxId) -> bool {
        self.transactions.iter().any(|t| &t.id == tx)
    }

    /// Channels this user is currently tracked in.
    pub fn active_memberships(&self) -> impl Iterator<Item = (&ChannelId, &Membership)> {
        self.joined_channels.iter().filter(|(_, m)| m.is_active())
    }
}

/// The "users" document: user id to record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsersDocument {
    pub users: BTreeMap<UserId, UserRecord>,
}

impl UsersDocument {
    pub fn get(&self, user: &UserId) -> Option<&UserRecord> {
        self.users.get(user)
    }

    /// Fetch or lazily create a user record.
    pub fn entry(&mut self, user: &UserId, now: DateTime<Utc>) -> &mut UserRecord {
        self.users
            .entry(user.clone())
            .or_insert_with(|| UserRecord::new(now))
    }

    pub fn membership(&self, user: &UserId, channel: &ChannelId) -> Option<&Membership> {
        self.users.get(user)?.joined_channels.get(channel)
    }

    /// Remove every membership pointing at `channel`. Returns how many went.
    pub fn purge_channel(&mut self, channel: &ChannelId) -> usize {
        self.users
            .values_mut()
            .filter_map(|u| u.joined_channels.remove(channel))
            .count()
    }

    /// Drop memberships of channels missing from `live` that were recorded
    /// no later than `seen_at`. Newer records may belong to a channel created
    /// after `live` was taken and are left alone.
    pub fn prune_orphans(&mut self, live: &BTreeSet<ChannelId>, seen_at: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for record in self.users.values_mut() {
            let before = record.joined_channels.len();
            record
                .joined_channels
                .retain(|id, m| live.contains(id) || m.joined_at > seen_at);
            removed += before - record.joined_channels.len();
        }
        removed
    }

    pub fn total_points(&self) -> i64 {
        self.users.values().map(|u| u.points).sum()
    }
}

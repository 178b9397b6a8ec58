//! The "system" document: channels, aggregate stats and admin settings.

use super::channel::Channel;
use super::ids::{ChannelId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_users: u64,
    /// Points in circulation, maintained best-effort from ledger deltas.
    pub total_points: i64,
    pub total_joins: u64,
    pub total_purchases: u64,
    pub total_daily_gifts: u64,
    pub total_penalties: u64,
    pub total_reactivations: u64,
    pub total_codes_redeemed: u64,
    #[serde(default)]
    pub total_invites: u64,
    #[serde(default)]
    pub total_refunds: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftCode {
    pub points: i64,
    pub max_uses: u32,
    #[serde(default)]
    pub used_by: BTreeSet<UserId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl GiftCode {
    pub fn remaining(&self) -> u32 {
        self.max_uses.saturating_sub(self.used_by.len() as u32)
    }
}

/// Tombstone kept after a channel is removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedChannel {
    pub id: ChannelId,
    pub owner: UserId,
    pub channel_ref: String,
    pub round: u32,
    pub reason: String,
    pub deleted_at: DateTime<Utc>,
}

impl DeletedChannel {
    pub fn of(channel: &Channel, reason: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: channel.id.clone(),
            owner: channel.owner.clone(),
            channel_ref: channel.channel_ref.clone(),
            round: channel.round,
            reason: reason.to_string(),
            deleted_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemDocument {
    #[serde(default)]
    pub channels: BTreeMap<ChannelId, Channel>,
    #[serde(default)]
    pub stats: SystemStats,
    #[serde(default)]
    pub admins: BTreeSet<UserId>,
    #[serde(default)]
    pub banned_users: BTreeSet<UserId>,
    #[serde(default)]
    pub codes: BTreeMap<String, GiftCode>,
    #[serde(default)]
    pub deleted_channels: VecDeque<DeletedChannel>,
}

impl SystemDocument {
    /// An owner's channel with the given ref, if any.
    pub fn find_owned(&self, owner: &UserId, channel_ref: &str) -> Option<&Channel> {
        self.channels
            .values()
            .find(|c| &c.owner == owner && c.channel_ref.eq_ignore_ascii_case(channel_ref))
    }

    pub fn is_banned(&self, user: &UserId) -> bool {
        self.banned_users.contains(user)
    }

    /// Append a tombstone, dropping the oldest beyond `limit`.
    pub fn push_deleted(&mut self, entry: DeletedChannel, limit: usize) {
        self.deleted_channels.push_back(entry);
        while self.deleted_channels.len() > limit {
            self.deleted_channels.pop_front();
        }
    }

    pub fn active_channel_count(&self) -> usize {
        self.channels.values().filter(|c| !c.completed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tombstone(n: u32) -> DeletedChannel {
        DeletedChannel {
            id: ChannelId::new(format!("ch_{n}")),
            owner: UserId::new("1"),
            channel_ref: "news".into(),
            round: n,
            reason: "test".into(),
            deleted_at: Utc::now(),
        }
    }

    #[test]
    fn deleted_history_is_bounded() {
        let mut doc = SystemDocument::default();
        for n in 0..5 {
            doc.push_deleted(tombstone(n), 3);
        }
        assert_eq!(doc.deleted_channels.len(), 3);
        assert_eq!(doc.deleted_channels.front().unwrap().round, 2);
    }

    #[test]
    fn find_owned_ignores_case() {
        let mut doc = SystemDocument::default();
        let owner = UserId::new("9");
        let ch = Channel::new(ChannelId::new("ch_a"), owner.clone(), "NewsFeed", 10, Utc::now());
        doc.channels.insert(ch.id.clone(), ch);
        assert!(doc.find_owned(&owner, "newsfeed").is_some());
        assert!(doc.find_owned(&UserId::new("8"), "newsfeed").is_none());
    }
}

//! Scriptable in-process oracle.

use super::{BotStatus, MembershipOracle, Subscription, normalize_ref};
use crate::state::{DashMapExt, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Answers from a table. Pairs that were never set answer UNKNOWN, so a
/// dry run never penalizes anyone.
#[derive(Debug, Default)]
pub struct StaticOracle {
    subscriptions: DashMap<(UserId, String), Subscription>,
    admin_of: DashMap<String, BotStatus>,
    queries: AtomicUsize,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user: &UserId, channel_ref: &str, answer: Subscription) {
        self.subscriptions
            .insert((user.clone(), normalize_ref(channel_ref)), answer);
    }

    pub fn set_bot_admin(&self, channel_ref: &str, admin: bool) {
        let status = if admin {
            BotStatus::Admin
        } else {
            BotStatus::NotAdmin
        };
        self.admin_of.insert(normalize_ref(channel_ref), status);
    }

    /// Subscription checks answered so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MembershipOracle for StaticOracle {
    async fn check_subscription(&self, user: &UserId, channel_ref: &str) -> Subscription {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .get_cloned(&(user.clone(), normalize_ref(channel_ref)))
            .unwrap_or(Subscription::Unknown)
    }

    async fn check_bot_admin(&self, channel_ref: &str) -> BotStatus {
        self.admin_of
            .get_cloned(&normalize_ref(channel_ref))
            .unwrap_or(BotStatus::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unset_pairs_are_unknown() {
        let oracle = StaticOracle::new();
        let user = UserId::new("1");
        assert_eq!(oracle.check_subscription(&user, "news").await, Subscription::Unknown);
        assert_eq!(oracle.check_bot_admin("news").await, BotStatus::Unknown);

        oracle.set(&user, "@News", Subscription::Member);
        oracle.set_bot_admin("@news", true);
        assert_eq!(oracle.check_subscription(&user, "news").await, Subscription::Member);
        assert_eq!(oracle.check_bot_admin("NEWS").await, BotStatus::Admin);
        assert_eq!(oracle.query_count(), 2);
    }
}

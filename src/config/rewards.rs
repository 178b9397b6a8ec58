//! Point amounts and ledger limits.

use super::defaults::*;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RewardsConfig {
    /// Credited for each verified join.
    #[serde(default = "default_join_reward")]
    pub join_reward: i64,
    /// Debited when a user leaves a channel that is still collecting.
    #[serde(default = "default_leave_penalty")]
    pub leave_penalty: i64,
    /// Purchase price is `required * price_per_member`.
    #[serde(default = "default_price_per_member")]
    pub price_per_member: i64,
    #[serde(default = "default_daily_gift")]
    pub daily_gift: i64,
    /// Credited to a referrer once per invited user.
    #[serde(default = "default_invite_reward")]
    pub invite_reward: i64,
    /// Attempts for the best-effort aggregate stats update.
    #[serde(default = "default_stats_retry_attempts")]
    pub stats_retry_attempts: u32,
    /// Per-user transaction log length. Replays older than this are not detected.
    #[serde(default = "default_max_transactions")]
    pub max_transactions_per_user: usize,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            join_reward: default_join_reward(),
            leave_penalty: default_leave_penalty(),
            price_per_member: default_price_per_member(),
            daily_gift: default_daily_gift(),
            invite_reward: default_invite_reward(),
            stats_retry_attempts: default_stats_retry_attempts(),
            max_transactions_per_user: default_max_transactions(),
        }
    }
}

impl RewardsConfig {
    pub fn price_for(&self, required: u32) -> i64 {
        i64::from(required) * self.price_per_member
    }
}

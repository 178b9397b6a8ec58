//! External membership authority.
//!
//! The exchange never decides on its own whether a user is subscribed to a
//! channel; it asks an oracle. Every answer is tri-state, and
//! [`Subscription::Unknown`] must never be treated as "not a member".

mod static_oracle;
mod telegram;

pub use static_oracle::StaticOracle;
pub use telegram::TelegramOracle;

use crate::config::{OracleConfig, OracleProvider};
use crate::state::UserId;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Member,
    NotMember,
    /// The oracle could not answer. Callers abstain.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStatus {
    Admin,
    NotAdmin,
    Unknown,
}

#[async_trait]
pub trait MembershipOracle: Send + Sync {
    /// Is `user` currently subscribed to `channel_ref`?
    async fn check_subscription(&self, user: &UserId, channel_ref: &str) -> Subscription;

    /// Does the exchange's bot administer `channel_ref`?
    async fn check_bot_admin(&self, channel_ref: &str) -> BotStatus;
}

/// Build the oracle selected in `config`.
pub fn from_config(config: &OracleConfig) -> Arc<dyn MembershipOracle> {
    match config.provider {
        OracleProvider::Static => Arc::new(StaticOracle::new()),
        OracleProvider::Telegram => Arc::new(TelegramOracle::new(config)),
    }
}

/// Channel refs are stored and compared without `@` and case-insensitively.
pub fn normalize_ref(channel_ref: &str) -> String {
    channel_ref.trim().trim_start_matches('@').to_ascii_lowercase()
}

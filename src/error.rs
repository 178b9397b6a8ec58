//! Unified error handling for pointex.
//!
//! One enum per layer, each with a static `error_code()` used as a metrics
//! label. Domain rule violations are returned to the caller and never
//! retried; persistence failures are surfaced so the caller knows the
//! action did not take effect.

use crate::state::{ChannelId, TxId};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Store Errors (persistence)
// ============================================================================

/// Errors from the document store and its backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(String),

    /// Injected by the in-memory backend.
    #[error("write rejected by backend")]
    WriteRejected,
}

impl StoreError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "store_io",
            Self::Serialization(_) => "store_serialization",
            Self::Database(_) => "store_database",
            Self::WriteRejected => "store_write_rejected",
        }
    }
}

// ============================================================================
// Exchange Errors (business operations)
// ============================================================================

/// Errors returned by exchange operations.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(TxId),

    #[error("channel not found: {0}")]
    ChannelNotFound(ChannelId),

    #[error("channel already completed")]
    ChannelCompleted,

    #[error("already joined this round")]
    AlreadyMember,

    #[error("owners cannot join their own channel")]
    OwnerCannotJoinOwnChannel,

    /// Oracle could not answer; nothing was changed and the caller may retry.
    #[error("membership could not be confirmed right now")]
    OracleUnknown,

    #[error("user is not subscribed to the channel")]
    NotSubscribed,

    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: i64, available: i64 },

    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),

    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("invalid channel reference: {0}")]
    InvalidChannelRef(String),

    #[error("channel is not completed")]
    ChannelNotCompleted,

    #[error("an active channel already exists for {0}")]
    ChannelAlreadyActive(String),

    /// The channel moved to a new round between eligibility check and commit.
    #[error("channel round changed during the operation")]
    StaleRound,

    #[error("membership is not tracked")]
    NotTracked,

    #[error("user is banned")]
    UserBanned,

    #[error("not permitted")]
    NotPermitted,

    #[error("rate limited, retry in {0:?}")]
    RateLimited(Duration),

    #[error("gift code not found: {0}")]
    CodeNotFound(String),

    #[error("gift code already exists: {0}")]
    CodeExists(String),

    #[error("gift code exhausted: {0}")]
    CodeExhausted(String),

    #[error("gift code already redeemed: {0}")]
    CodeAlreadyRedeemed(String),

    #[error("daily gift not ready, retry in {0:?}")]
    DailyGiftNotReady(Duration),

    #[error("bot is not an administrator of {0}")]
    BotNotAdmin(String),
}

impl ExchangeError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateTransaction(_) => "duplicate_transaction",
            Self::ChannelNotFound(_) => "channel_not_found",
            Self::ChannelCompleted => "channel_completed",
            Self::AlreadyMember => "already_member",
            Self::OwnerCannotJoinOwnChannel => "owner_cannot_join",
            Self::OracleUnknown => "oracle_unknown",
            Self::NotSubscribed => "not_subscribed",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::PersistenceFailure(_) => "persistence_failure",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InvalidChannelRef(_) => "invalid_channel_ref",
            Self::ChannelNotCompleted => "channel_not_completed",
            Self::ChannelAlreadyActive(_) => "channel_already_active",
            Self::StaleRound => "stale_round",
            Self::NotTracked => "not_tracked",
            Self::UserBanned => "user_banned",
            Self::NotPermitted => "not_permitted",
            Self::RateLimited(_) => "rate_limited",
            Self::CodeNotFound(_) => "code_not_found",
            Self::CodeExists(_) => "code_exists",
            Self::CodeExhausted(_) => "code_exhausted",
            Self::CodeAlreadyRedeemed(_) => "code_already_redeemed",
            Self::DailyGiftNotReady(_) => "daily_gift_not_ready",
            Self::BotNotAdmin(_) => "bot_not_admin",
        }
    }

    /// Whether the caller may retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::OracleUnknown
                | Self::PersistenceFailure(_)
                | Self::RateLimited(_)
                | Self::StaleRound
        )
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

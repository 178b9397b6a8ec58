//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::{Config, OracleProvider, StoreBackendKind};
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("server.name is required")]
    MissingServerName,
    #[error("store.path is required for the {0:?} backend")]
    MissingStorePath(StoreBackendKind),
    #[error("store.path parent directory does not exist: {0}")]
    StorePathInvalid(String),
    #[error("store.max_backups must be at least 1")]
    NoBackupsRetained,
    #[error("cooldowns.{0} must be a finite non-negative number, got {1}")]
    InvalidCooldown(&'static str, f64),
    #[error("rewards.{0} must be positive, got {1}")]
    NonPositiveReward(&'static str, i64),
    #[error("rewards.max_transactions_per_user must be at least 1")]
    EmptyTransactionLog,
    #[error("reconcile.concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("{0} must be at least 1")]
    ZeroInterval(&'static str),
    #[error("oracle.bot_token is required for the telegram provider")]
    MissingBotToken,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() {
        errors.push(ValidationError::MissingServerName);
    }

    // Store
    let store = &config.store;
    if store.backend != StoreBackendKind::Memory {
        if store.path.is_empty() {
            errors.push(ValidationError::MissingStorePath(store.backend));
        } else if store.backend == StoreBackendKind::Redb
            && let Some(parent) = Path::new(&store.path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            errors.push(ValidationError::StorePathInvalid(store.path.clone()));
        }
    }
    if store.max_backups == 0 {
        errors.push(ValidationError::NoBackupsRetained);
    }

    for (name, secs) in config.cooldowns.entries() {
        if !secs.is_finite() || secs < 0.0 {
            errors.push(ValidationError::InvalidCooldown(name, secs));
        }
    }

    // Rewards
    let rewards = &config.rewards;
    for (name, value) in [
        ("join_reward", rewards.join_reward),
        ("leave_penalty", rewards.leave_penalty),
        ("price_per_member", rewards.price_per_member),
        ("daily_gift", rewards.daily_gift),
        ("invite_reward", rewards.invite_reward),
    ] {
        if value <= 0 {
            errors.push(ValidationError::NonPositiveReward(name, value));
        }
    }
    if rewards.max_transactions_per_user == 0 {
        errors.push(ValidationError::EmptyTransactionLog);
    }

    if config.reconcile.concurrency == 0 {
        errors.push(ValidationError::ZeroConcurrency);
    }
    for (name, secs) in [
        ("reconcile.interval_secs", config.reconcile.interval_secs),
        ("channels.sweep_interval_secs", config.channels.sweep_interval_secs),
        ("store.backup_interval_secs", config.store.backup_interval_secs),
    ] {
        if secs == 0 {
            errors.push(ValidationError::ZeroInterval(name));
        }
    }

    if config.oracle.provider == OracleProvider::Telegram
        && config.oracle.bot_token.as_deref().is_none_or(str::is_empty)
    {
        errors.push(ValidationError::MissingBotToken);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

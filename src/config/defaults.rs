//! Default value functions for configuration.

// =============================================================================
// Server / Store Defaults
// =============================================================================

pub fn default_server_name() -> String {
    "pointex".to_string()
}

pub fn default_store_path() -> String {
    "data".to_string()
}

pub fn default_cache_ttl() -> u64 {
    30
}

pub fn default_max_backups() -> usize {
    20
}

pub fn default_backup_interval() -> u64 {
    1800
}

// =============================================================================
// Cooldown Defaults (seconds)
// =============================================================================

pub fn default_join_cooldown() -> f64 {
    10.0
}

pub fn default_verify_cooldown() -> f64 {
    5.0
}

pub fn default_daily_gift_cooldown() -> f64 {
    1.0
}

pub fn default_store_cooldown() -> f64 {
    2.0
}

pub fn default_admin_cooldown() -> f64 {
    0.5
}

pub fn default_general_cooldown() -> f64 {
    1.0
}

pub fn default_tx_retention() -> u64 {
    24 * 60 * 60
}

// =============================================================================
// Reward Defaults
// =============================================================================

pub fn default_join_reward() -> i64 {
    3
}

pub fn default_leave_penalty() -> i64 {
    5
}

pub fn default_price_per_member() -> i64 {
    2
}

pub fn default_daily_gift() -> i64 {
    3
}

pub fn default_invite_reward() -> i64 {
    4
}

pub fn default_stats_retry_attempts() -> u32 {
    3
}

pub fn default_max_transactions() -> usize {
    1000
}

// =============================================================================
// Job Defaults
// =============================================================================

pub fn default_completed_retention_hours() -> u64 {
    24
}

pub fn default_deleted_history_limit() -> usize {
    100
}

pub fn default_sweep_interval() -> u64 {
    3600
}

pub fn default_reconcile_interval() -> u64 {
    600
}

pub fn default_reconcile_concurrency() -> usize {
    8
}

pub fn default_true() -> bool {
    true
}

// =============================================================================
// Oracle Defaults
// =============================================================================

pub fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

pub fn default_oracle_timeout() -> u64 {
    10
}

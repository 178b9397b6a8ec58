//! Channel retention and background job configuration.

use super::defaults::*;
use serde::Deserialize;
use std::time::Duration;

/// Channel lifecycle limits and the maintenance sweep.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelsConfig {
    /// Completed channels older than this are deleted by the sweep.
    #[serde(default = "default_completed_retention_hours")]
    pub completed_retention_hours: u64,
    /// Tombstones kept for deleted channels.
    #[serde(default = "default_deleted_history_limit")]
    pub deleted_history_limit: usize,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Delete collecting channels whose bot admin rights are gone.
    #[serde(default = "default_true")]
    pub remove_when_bot_not_admin: bool,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            completed_retention_hours: default_completed_retention_hours(),
            deleted_history_limit: default_deleted_history_limit(),
            sweep_interval_secs: default_sweep_interval(),
            remove_when_bot_not_admin: true,
        }
    }
}

impl ChannelsConfig {
    pub fn completed_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.completed_retention_hours as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Periodic membership reconciliation.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,
    /// Oracle queries in flight at once.
    #[serde(default = "default_reconcile_concurrency")]
    pub concurrency: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reconcile_interval(),
            concurrency: default_reconcile_concurrency(),
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

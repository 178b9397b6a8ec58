//! Cooldown configuration.

use super::defaults::*;
use serde::Deserialize;
use std::time::Duration;

/// Minimum spacing between two allowed calls of one action by one user.
///
/// Values are seconds and may be fractional. Zero disables the cooldown.
#[derive(Debug, Clone, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_join_cooldown")]
    pub join_channel: f64,
    #[serde(default = "default_verify_cooldown")]
    pub verify_channel: f64,
    #[serde(default = "default_daily_gift_cooldown")]
    pub daily_gift: f64,
    #[serde(default = "default_store_cooldown")]
    pub store: f64,
    #[serde(default = "default_admin_cooldown")]
    pub admin: f64,
    #[serde(default = "default_general_cooldown")]
    pub general: f64,
    /// How long seen transaction ids and idle limiters are retained.
    #[serde(default = "default_tx_retention")]
    pub retention_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            join_channel: default_join_cooldown(),
            verify_channel: default_verify_cooldown(),
            daily_gift: default_daily_gift_cooldown(),
            store: default_store_cooldown(),
            admin: default_admin_cooldown(),
            general: default_general_cooldown(),
            retention_secs: default_tx_retention(),
        }
    }
}

impl CooldownConfig {
    /// All cooldowns zeroed; transaction de-duplication still applies.
    pub fn disabled() -> Self {
        Self {
            join_channel: 0.0,
            verify_channel: 0.0,
            daily_gift: 0.0,
            store: 0.0,
            admin: 0.0,
            general: 0.0,
            retention_secs: default_tx_retention(),
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Each configured window with its key name, for validation.
    pub(crate) fn entries(&self) -> [(&'static str, f64); 6] {
        [
            ("join_channel", self.join_channel),
            ("verify_channel", self.verify_channel),
            ("daily_gift", self.daily_gift),
            ("store", self.store),
            ("admin", self.admin),
            ("general", self.general),
        ]
    }
}

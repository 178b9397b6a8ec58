//! Membership oracle configuration.

use super::defaults::*;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    /// In-process table; unknown pairs answer UNKNOWN.
    #[default]
    Static,
    /// Telegram Bot API `getChatMember`.
    Telegram,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    #[serde(default)]
    pub provider: OracleProvider,
    /// Required for the `telegram` provider.
    pub bot_token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: OracleProvider::default(),
            bot_token: None,
            api_base: default_api_base(),
            timeout_secs: default_oracle_timeout(),
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

//! Core configuration types and loading.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::cooldowns::CooldownConfig;
use super::defaults::*;
use super::jobs::{ChannelsConfig, ReconcileConfig};
use super::oracle::OracleConfig;
use super::rewards::RewardsConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Exchange daemon configuration.
///
/// Every section is optional in the file; missing sections take defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cooldowns: CooldownConfig,
    #[serde(default)]
    pub rewards: RewardsConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Daemon identity.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Prometheus metrics HTTP port. Disabled when unset.
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            metrics_port: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    /// One JSON file per document.
    #[default]
    Json,
    /// Embedded redb database.
    Redb,
    /// Process memory only.
    Memory,
}

/// Document store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackendKind,
    /// Directory for `json`, database file for `redb`.
    #[serde(default = "default_store_path")]
    pub path: String,
    /// How long a cached document is served without re-reading.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Snapshot directory for the `json` backend. Defaults to `<path>/backups`.
    pub backup_dir: Option<String>,
    /// Snapshots kept per document.
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    #[serde(default = "default_backup_interval")]
    pub backup_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::default(),
            path: default_store_path(),
            cache_ttl_secs: default_cache_ttl(),
            backup_dir: None,
            max_backups: default_max_backups(),
            backup_interval_secs: default_backup_interval(),
        }
    }
}

impl StoreConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn backup_path(&self) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => PathBuf::from(dir),
            None => Path::new(&self.path).join("backups"),
        }
    }
}

/// Administrators seeded into the system document at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub admins: Vec<String>,
}

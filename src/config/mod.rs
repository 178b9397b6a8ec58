//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Top-level [`Config`], server and store sections
//! - [`cooldowns`]: Per-action cooldown windows
//! - [`rewards`]: Point amounts and ledger limits
//! - [`jobs`]: Channel retention and background job settings
//! - [`oracle`]: Membership oracle provider selection

mod cooldowns;
mod defaults;
mod jobs;
mod oracle;
mod rewards;
mod types;
mod validation;

pub use cooldowns::CooldownConfig;
pub use jobs::{ChannelsConfig, ReconcileConfig};
pub use oracle::{OracleConfig, OracleProvider};
pub use rewards::RewardsConfig;
pub use types::{AdminConfig, Config, ConfigError, ServerConfig, StoreBackendKind, StoreConfig};
pub use validation::{ValidationError, validate};

//! pointex - point exchange core.
//!
//! Users earn points by joining collection channels; owners spend points to
//! run collection rounds. The crate provides the round state machine, an
//! idempotent points ledger and the locking and persistence layer that keeps
//! both consistent under concurrent access.

pub mod config;
pub mod error;
pub mod exchange;
pub mod http;
pub mod metrics;
pub mod oracle;
pub mod security;
pub mod services;
pub mod state;
pub mod store;

pub use config::Config;
pub use error::{ExchangeError, ExchangeResult, StoreError};
pub use exchange::{Exchange, ExchangeEvent};
pub use store::Store;

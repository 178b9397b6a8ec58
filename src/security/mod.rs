//! Abuse controls applied before any mutation is attempted.
//!
//! - **Cooldowns**: governor-based per-user, per-action call spacing
//! - **Replay guard**: recently seen transaction ids are refused

pub mod cooldown;

pub use cooldown::{ActionKind, CooldownManager, CooldownStats, Gate};

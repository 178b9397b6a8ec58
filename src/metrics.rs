//! Prometheus metrics for the exchange.
//!
//! - `pointex_joins_total{returning}` - Verified joins credited
//! - `pointex_penalties_total` - Leave penalties applied
//! - `pointex_completions_total` / `pointex_reactivations_total` - Round transitions
//! - `pointex_operation_errors_total{operation,error}` - Failed operations by error code
//! - `pointex_active_channels` - Channels currently collecting
//!
//! Recording helpers are no-ops until [`init`] has run, so library users and
//! tests never need a registry.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters
// ========================================================================

pub static JOINS: OnceLock<IntCounterVec> = OnceLock::new();

pub static PENALTIES: OnceLock<IntCounter> = OnceLock::new();

pub static COMPLETIONS: OnceLock<IntCounter> = OnceLock::new();

pub static REACTIVATIONS: OnceLock<IntCounter> = OnceLock::new();

pub static REFERRALS: OnceLock<IntCounter> = OnceLock::new();

/// Collecting channels removed after the bot lost admin rights.
pub static UNMANAGED_REMOVALS: OnceLock<IntCounter> = OnceLock::new();

/// Replayed idempotency keys rejected by the ledger or cooldown gate.
pub static DUPLICATE_TRANSACTIONS: OnceLock<IntCounter> = OnceLock::new();

pub static COOLDOWN_DENIALS: OnceLock<IntCounterVec> = OnceLock::new();

/// Oracle answered UNKNOWN and the operation abstained.
pub static ORACLE_ABSTENTIONS: OnceLock<IntCounterVec> = OnceLock::new();

pub static PERSISTENCE_FAILURES: OnceLock<IntCounterVec> = OnceLock::new();

pub static OPERATION_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges
// ========================================================================

pub static ACTIVE_CHANNELS: OnceLock<IntGauge> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Call once at daemon startup. Repeated calls are harmless.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            match $init {
                Ok(m) => {
                    if let Err(e) = r.register(Box::new(m.clone())) {
                        tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                    }
                    let _ = $metric.set(m);
                }
                Err(e) => {
                    tracing::warn!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                }
            }
        };
    }

    register!(JOINS, IntCounterVec::new(Opts::new("pointex_joins_total", "Verified joins credited"), &["returning"]));
    register!(PENALTIES, IntCounter::new("pointex_penalties_total", "Leave penalties applied"));
    register!(COMPLETIONS, IntCounter::new("pointex_completions_total", "Channel rounds completed"));
    register!(REACTIVATIONS, IntCounter::new("pointex_reactivations_total", "Channels reactivated into a new round"));
    register!(REFERRALS, IntCounter::new("pointex_referrals_total", "Referral rewards credited"));
    register!(UNMANAGED_REMOVALS, IntCounter::new("pointex_unmanaged_channel_removals_total", "Channels removed after the bot lost admin rights"));
    register!(DUPLICATE_TRANSACTIONS, IntCounter::new("pointex_duplicate_transactions_total", "Replayed transaction ids rejected"));
    register!(COOLDOWN_DENIALS, IntCounterVec::new(Opts::new("pointex_cooldown_denials_total", "Calls denied by a cooldown"), &["action"]));
    register!(ORACLE_ABSTENTIONS, IntCounterVec::new(Opts::new("pointex_oracle_abstentions_total", "Operations skipped on an UNKNOWN oracle answer"), &["source"]));
    register!(PERSISTENCE_FAILURES, IntCounterVec::new(Opts::new("pointex_persistence_failures_total", "Document writes that failed"), &["document"]));
    register!(OPERATION_ERRORS, IntCounterVec::new(Opts::new("pointex_operation_errors_total", "Failed exchange operations"), &["operation", "error"]));
    register!(ACTIVE_CHANNELS, IntGauge::new("pointex_active_channels", "Channels currently collecting members"));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn inc(metric: &OnceLock<IntCounter>) {
    if let Some(c) = metric.get() {
        c.inc();
    }
}

fn inc_labeled(metric: &OnceLock<IntCounterVec>, labels: &[&str]) {
    if let Some(c) = metric.get() {
        c.with_label_values(labels).inc();
    }
}

#[inline]
pub fn record_join(returning: bool) {
    inc_labeled(&JOINS, &[if returning { "true" } else { "false" }]);
}

#[inline]
pub fn record_penalty() {
    inc(&PENALTIES);
}

#[inline]
pub fn record_completion() {
    inc(&COMPLETIONS);
}

#[inline]
pub fn record_reactivation() {
    inc(&REACTIVATIONS);
}

#[inline]
pub fn record_referral() {
    inc(&REFERRALS);
}

#[inline]
pub fn record_unmanaged_removal() {
    inc(&UNMANAGED_REMOVALS);
}

#[inline]
pub fn record_duplicate_transaction() {
    inc(&DUPLICATE_TRANSACTIONS);
}

#[inline]
pub fn record_cooldown_denial(action: &str) {
    inc_labeled(&COOLDOWN_DENIALS, &[action]);
}

#[inline]
pub fn record_oracle_abstention(source: &str) {
    inc_labeled(&ORACLE_ABSTENTIONS, &[source]);
}

#[inline]
pub fn record_persistence_failure(document: &str) {
    inc_labeled(&PERSISTENCE_FAILURES, &[document]);
}

#[inline]
pub fn record_operation_error(operation: &str, error: &str) {
    inc_labeled(&OPERATION_ERRORS, &[operation, error]);
}

#[inline]
pub fn set_active_channels(count: usize) {
    if let Some(g) = ACTIVE_CHANNELS.get() {
        g.set(count as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_lifecycle() {
        init();
        record_join(true);
        record_penalty();
        record_cooldown_denial("verify_channel");
        record_operation_error("verify_join", "oracle_unknown");
        set_active_channels(3);

        let output = gather_metrics();
        assert!(output.contains("pointex_joins_total"));
        assert!(output.contains("pointex_active_channels"));
        assert!(output.contains("oracle_unknown"));
    }
}

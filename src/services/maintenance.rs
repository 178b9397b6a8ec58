//! Housekeeping: completed-channel sweep, removal of channels the bot no
//! longer administers, consistency repair, cooldown and lock-registry
//! cleanup, and periodic snapshots.

use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub channels_swept: usize,
    pub unmanaged_removed: usize,
    pub channels_repaired: usize,
    pub orphan_memberships: usize,
    pub cooldowns_collected: usize,
    pub locks_pruned: usize,
}

/// One maintenance pass.
pub async fn run_once(exchange: &Exchange) -> Result<MaintenanceReport, ExchangeError> {
    let now = Utc::now();
    let swept = exchange.registry().sweep_completed(now).await?;
    let unmanaged = if exchange.config().channels.remove_when_bot_not_admin {
        exchange.remove_unmanaged_channels().await?.removed
    } else {
        0
    };
    let repair = exchange.registry().repair(now).await?;
    let report = MaintenanceReport {
        channels_swept: swept.len(),
        unmanaged_removed: unmanaged,
        channels_repaired: repair.channels_fixed,
        orphan_memberships: repair.orphan_memberships,
        cooldowns_collected: exchange.cooldowns().collect_garbage(),
        locks_pruned: exchange.locks().prune_idle(),
    };

    if report == MaintenanceReport::default() {
        debug!("maintenance pass found nothing to do");
    } else {
        info!(
            swept = report.channels_swept,
            unmanaged = report.unmanaged_removed,
            repaired = report.channels_repaired,
            orphans = report.orphan_memberships,
            cooldowns = report.cooldowns_collected,
            locks = report.locks_pruned,
            "maintenance pass finished"
        );
    }
    Ok(report)
}

pub fn spawn_maintenance_task(exchange: Arc<Exchange>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = run_once(&exchange).await {
                error!(error = %e, "maintenance pass failed");
            }
        }
    });
}

/// Snapshot both documents every `every`, keeping the configured number
/// of backups.
pub fn spawn_backup_task(store: Arc<Store>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            match store.snapshot_all().await {
                Ok(taken) => debug!(taken, "periodic snapshot"),
                Err(e) => error!(error = %e, "periodic snapshot failed"),
            }
        }
    });
}

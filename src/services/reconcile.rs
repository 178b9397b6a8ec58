//! Membership reconciliation.
//!
//! Periodically asks the oracle about every tracked membership and applies
//! the leave path to users who are gone. An oracle that cannot answer is
//! never read as "not a member": the membership is skipped until the next
//! sweep.

use crate::config::ReconcileConfig;
use crate::error::ExchangeError;
use crate::exchange::{Exchange, LeaveOutcome, TrackedMembership};
use crate::metrics;
use crate::oracle::Subscription;
use futures_util::StreamExt;
use futures_util::stream;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub still_member: usize,
    pub penalized: usize,
    pub left_completed: usize,
    pub removed_stale: usize,
    pub abstained: usize,
    /// Already left by the time the leave was applied.
    pub skipped: usize,
    pub failed: usize,
}

enum Verdict {
    Member,
    Abstained,
    Skipped,
    Left(LeaveOutcome),
    Failed,
}

pub struct Reconciler {
    exchange: Arc<Exchange>,
    concurrency: usize,
}

impl Reconciler {
    pub fn new(exchange: Arc<Exchange>, concurrency: usize) -> Self {
        Self {
            exchange,
            concurrency: concurrency.max(1),
        }
    }

    /// Check every tracked membership once.
    pub async fn sweep(&self) -> Result<SweepReport, ExchangeError> {
        let tracked = self.exchange.tracker().active_memberships().await?;
        let mut report = SweepReport {
            checked: tracked.len(),
            ..SweepReport::default()
        };

        let verdicts: Vec<Verdict> = stream::iter(tracked)
            .map(|m| self.check(m))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for verdict in verdicts {
            match verdict {
                Verdict::Member => report.still_member += 1,
                Verdict::Abstained => report.abstained += 1,
                Verdict::Skipped => report.skipped += 1,
                Verdict::Failed => report.failed += 1,
                Verdict::Left(LeaveOutcome::Penalized { .. }) => report.penalized += 1,
                Verdict::Left(LeaveOutcome::LeftCompleted { .. }) => report.left_completed += 1,
                Verdict::Left(LeaveOutcome::ChannelGone) => report.removed_stale += 1,
            }
        }

        info!(
            checked = report.checked,
            penalized = report.penalized,
            left_completed = report.left_completed,
            abstained = report.abstained,
            failed = report.failed,
            "reconciliation sweep finished"
        );
        Ok(report)
    }

    async fn check(&self, m: TrackedMembership) -> Verdict {
        let answer = match &m.channel_ref {
            Some(channel_ref) => {
                self.exchange
                    .oracle()
                    .check_subscription(&m.user, channel_ref)
                    .await
            }
            // Deleted channel: nothing to ask, just drop the record.
            None => Subscription::NotMember,
        };

        match answer {
            Subscription::Member => Verdict::Member,
            Subscription::Unknown => {
                debug!(user = %m.user, channel = %m.channel, "oracle abstained, membership skipped");
                metrics::record_oracle_abstention("reconcile");
                Verdict::Abstained
            }
            Subscription::NotMember => match self.exchange.mark_left(&m.user, &m.channel).await {
                Ok(outcome) => Verdict::Left(outcome),
                Err(ExchangeError::NotTracked) => Verdict::Skipped,
                Err(e) => {
                    warn!(user = %m.user, channel = %m.channel, error = %e, "leave not applied");
                    Verdict::Failed
                }
            },
        }
    }
}

/// Run [`Reconciler::sweep`] on a fixed interval.
pub fn spawn_reconcile_task(exchange: Arc<Exchange>, config: ReconcileConfig) {
    if !config.enabled {
        info!("membership reconciliation disabled");
        return;
    }
    let reconciler = Reconciler::new(exchange, config.concurrency);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup stays quiet.
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Err(e) = reconciler.sweep().await {
                warn!(error = %e, "reconciliation sweep failed");
            }
        }
    });
}

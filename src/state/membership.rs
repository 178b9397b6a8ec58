//! Per (user, channel) membership record.
//!
//! One record exists per pair. It is overwritten in place across rounds;
//! `round` says which generation of the channel it describes.

use super::ids::TxId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub round: u32,
    pub verified: bool,
    pub left: bool,
    pub left_at: Option<DateTime<Utc>>,
    /// The user left after the channel had already completed this round.
    #[serde(default)]
    pub left_completed: bool,
    #[serde(default)]
    pub completed_round: Option<u32>,
    pub joined_at: DateTime<Utc>,
    /// Idempotency key of the join that produced this record.
    pub join_tx: TxId,
    #[serde(default)]
    pub points_earned: i64,
    /// Number of verified joins across all rounds.
    #[serde(default)]
    pub joins: u32,
}

/// What happened to a membership when its user was found gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveKind {
    /// Channel was still collecting: counter drops and a penalty applies.
    Active,
    /// Channel had completed: recorded so the same round cannot pay twice.
    Completed,
}

impl Membership {
    /// Fresh record for a first verified join.
    pub fn joined(round: u32, tx: TxId, reward: i64, now: DateTime<Utc>) -> Self {
        Self {
            round,
            verified: true,
            left: false,
            left_at: None,
            left_completed: false,
            completed_round: None,
            joined_at: now,
            join_tx: tx,
            points_earned: reward,
            joins: 1,
        }
    }

    /// Tracked by reconciliation: verified and not yet left.
    pub fn is_active(&self) -> bool {
        self.verified && !self.left
    }

    /// Overwrite this record with a new verified join.
    pub fn rejoin(&mut self, round: u32, tx: TxId, reward: i64, now: DateTime<Utc>) {
        self.round = round;
        self.verified = true;
        self.left = false;
        self.left_at = None;
        self.left_completed = false;
        self.completed_round = None;
        self.joined_at = now;
        self.join_tx = tx;
        self.points_earned += reward;
        self.joins += 1;
    }

    pub fn mark_left(
        &mut self,
        now: DateTime<Utc>,
        channel_completed: bool,
        channel_round: u32,
    ) -> LeaveKind {
        self.left = true;
        self.left_at = Some(now);
        if channel_completed {
            self.left_completed = true;
            self.completed_round = Some(channel_round);
            LeaveKind::Completed
        } else {
            LeaveKind::Active
        }
    }
}

//! Collection channel entity and its round state machine.
//!
//! A channel cycles `Active -> Completed -> Active (round + 1) -> ...`.
//! The transition methods here are pure; persistence and locking live in
//! [`crate::exchange::ChannelRegistry`].

use super::ids::{ChannelId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state derived from the `completed` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Active,
    Completed,
}

/// Why a completed channel fell back to active within a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uncompletion {
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Per-round counters, reset on reactivation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStats {
    pub joins: u32,
    pub leaves: u32,
    pub returns: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub owner: UserId,
    /// Platform handle without the leading `@`.
    pub channel_ref: String,
    pub required: u32,
    pub current: u32,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    /// Reactivation generation. Starts at 0, only ever incremented.
    pub round: u32,
    pub created_at: DateTime<Utc>,
    pub reactivated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub previous_completion: Option<DateTime<Utc>>,
    #[serde(default)]
    pub uncompleted: Option<Uncompletion>,
    /// Round for which the completion event has already been emitted.
    #[serde(default)]
    pub completion_announced: Option<u32>,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub round_stats: RoundStats,
}

/// Result of counting one verified join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTransition {
    pub count: u32,
    pub required: u32,
    pub round: u32,
    /// True only for the join that crossed the threshold and announced it.
    pub completed_now: bool,
}

/// Result of counting one leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveTransition {
    pub count: u32,
    pub required: u32,
    pub uncompleted: bool,
}

/// Reactivation was requested on a channel that is still collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotCompleted;

impl Channel {
    pub fn new(
        id: ChannelId,
        owner: UserId,
        channel_ref: impl Into<String>,
        required: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            channel_ref: channel_ref.into(),
            required,
            current: 0,
            completed: false,
            completed_at: None,
            round: 0,
            created_at: now,
            reactivated_at: None,
            previous_completion: None,
            uncompleted: None,
            completion_announced: None,
            last_activity: None,
            round_stats: RoundStats::default(),
        }
    }

    pub fn state(&self) -> ChannelState {
        if self.completed {
            ChannelState::Completed
        } else {
            ChannelState::Active
        }
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.owner == user
    }

    pub fn progress_percent(&self) -> f64 {
        f64::from(self.current) * 100.0 / f64::from(self.required.max(1))
    }

    /// Count a verified join.
    ///
    /// The completion flag flips when the threshold is crossed; the
    /// announcement is made at most once per round even if a leave
    /// un-completes the channel and a later join crosses again.
    pub fn apply_join(&mut self, returning: bool, now: DateTime<Utc>) -> JoinTransition {
        self.current = self.current.saturating_add(1);
        self.last_activity = Some(now);
        self.round_stats.joins += 1;
        if returning {
            self.round_stats.returns += 1;
        }

        let mut completed_now = false;
        if !self.completed && self.current >= self.required {
            self.completed = true;
            self.completed_at = Some(now);
            self.uncompleted = None;
            if self.completion_announced != Some(self.round) {
                self.completion_announced = Some(self.round);
                completed_now = true;
            }
        }

        JoinTransition {
            count: self.current,
            required: self.required,
            round: self.round,
            completed_now,
        }
    }

    /// Count a leave. The counter never goes below zero.
    pub fn apply_leave(&mut self, reason: &str, now: DateTime<Utc>) -> LeaveTransition {
        self.current = self.current.saturating_sub(1);
        self.last_activity = Some(now);
        self.round_stats.leaves += 1;

        let mut uncompleted = false;
        if self.completed && self.current < self.required {
            self.completed = false;
            self.completed_at = None;
            self.uncompleted = Some(Uncompletion {
                at: now,
                reason: reason.to_string(),
            });
            uncompleted = true;
        }

        LeaveTransition {
            count: self.current,
            required: self.required,
            uncompleted,
        }
    }

    /// Start a new round. Only valid on a completed channel.
    pub fn apply_reactivation(
        &mut self,
        new_required: u32,
        now: DateTime<Utc>,
    ) -> Result<u32, NotCompleted> {
        if !self.completed {
            return Err(NotCompleted);
        }
        self.previous_completion = self.completed_at;
        self.round += 1;
        self.required = new_required;
        self.current = 0;
        self.completed = false;
        self.completed_at = None;
        self.uncompleted = None;
        self.reactivated_at = Some(now);
        self.last_activity = Some(now);
        self.round_stats = RoundStats::default();
        Ok(self.round)
    }

    /// Restore `completed => current >= required` and drop stale
    /// completion timestamps. Returns true if anything changed.
    pub fn repair(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        if self.completed && self.current < self.required {
            self.completed = false;
            self.completed_at = None;
            self.uncompleted = Some(Uncompletion {
                at: now,
                reason: "repair:below_required".to_string(),
            });
            changed = true;
        }
        if !self.completed && self.completed_at.is_some() {
            self.completed_at = None;
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(required: u32) -> Channel {
        Channel::new(
            ChannelId::new("ch_test"),
            UserId::new("owner"),
            "news",
            required,
            Utc::now(),
        )
    }

    #[test]
    fn completion_fires_once_on_crossing() {
        let mut ch = channel(2);
        assert!(!ch.apply_join(false, Utc::now()).completed_now);
        let t = ch.apply_join(false, Utc::now());
        assert!(t.completed_now);
        assert_eq!(ch.state(), ChannelState::Completed);

        // Further joins on a completed channel never re-announce.
        let t = ch.apply_join(true, Utc::now());
        assert!(!t.completed_now);
        assert_eq!(t.count, 3);
    }

    #[test]
    fn recrossing_after_uncompletion_does_not_reannounce() {
        let mut ch = channel(1);
        assert!(ch.apply_join(false, Utc::now()).completed_now);
        let leave = ch.apply_leave("user_left:7", Utc::now());
        assert!(leave.uncompleted);
        assert!(!ch.completed);
        assert_eq!(ch.uncompleted.as_ref().unwrap().reason, "user_left:7");

        let t = ch.apply_join(true, Utc::now());
        assert!(ch.completed);
        assert!(!t.completed_now);
    }

    #[test]
    fn leave_is_floored_at_zero() {
        let mut ch = channel(3);
        let t = ch.apply_leave("user_left:1", Utc::now());
        assert_eq!(t.count, 0);
        assert_eq!(ch.current, 0);
    }

    #[test]
    fn reactivation_requires_completion_and_bumps_round() {
        let mut ch = channel(1);
        assert_eq!(ch.apply_reactivation(5, Utc::now()), Err(NotCompleted));
        assert_eq!(ch.round, 0);

        ch.apply_join(false, Utc::now());
        assert_eq!(ch.apply_reactivation(5, Utc::now()), Ok(1));
        assert_eq!(ch.round, 1);
        assert_eq!(ch.current, 0);
        assert_eq!(ch.required, 5);
        assert!(!ch.completed);
        assert!(ch.previous_completion.is_some());
        assert_eq!(ch.round_stats, RoundStats::default());
    }

    #[test]
    fn new_round_announces_completion_again() {
        let mut ch = channel(1);
        assert!(ch.apply_join(false, Utc::now()).completed_now);
        ch.apply_reactivation(1, Utc::now()).unwrap();
        assert!(ch.apply_join(false, Utc::now()).completed_now);
    }

    #[test]
    fn repair_fixes_inconsistent_completion() {
        let mut ch = channel(4);
        ch.completed = true;
        ch.current = 2;
        ch.completed_at = Some(Utc::now());
        assert!(ch.repair(Utc::now()));
        assert!(!ch.completed);
        assert!(ch.completed_at.is_none());
        assert!(!ch.repair(Utc::now()));
    }
}

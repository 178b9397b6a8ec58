//! Join eligibility.
//!
//! A single pure function decides whether a user may join (and therefore
//! see) a channel right now. Inputs are the channel's round and completion
//! flag, whether the user owns it, and the user's membership record.
//!
//! Rules, first match wins:
//!
//! | # | Condition                                              | Result     |
//! |---|--------------------------------------------------------|------------|
//! | 1 | user owns the channel                                  | ineligible |
//! | 2 | `left_completed`, `completed_round < round`            | eligible   |
//! | 3 | `left_completed`, `completed_round >= round`           | ineligible |
//! | 4 | `membership.round == round`, verified and not left     | ineligible |
//! | 5 | `membership.round == round`, left                      | eligible   |
//! | 6 | `membership.round < round`                             | eligible   |
//! | 7 | channel completed                                      | ineligible |
//! | 8 | otherwise (including no record)                        | eligible   |
//!
//! A left user may rejoin within the same round (rule 5), but never after
//! the round already paid out (rule 3).

use crate::error::ExchangeError;
use crate::state::{Channel, Membership, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityInput {
    pub is_owner: bool,
    pub channel_round: u32,
    pub channel_completed: bool,
}

impl EligibilityInput {
    pub fn for_channel(channel: &Channel, user: &UserId) -> Self {
        Self {
            is_owner: channel.is_owned_by(user),
            channel_round: channel.round,
            channel_completed: channel.completed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    Owner,
    AlreadyJoined,
    /// Left after this round completed; waits for a reactivation.
    CompletedRoundServed,
    ChannelCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// `returning` is set when the user has joined this channel before.
    Eligible { returning: bool },
    Ineligible(Ineligible),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible { .. })
    }

    /// `Ok(returning)` or the matching domain error.
    pub fn into_result(self) -> Result<bool, ExchangeError> {
        match self {
            Eligibility::Eligible { returning } => Ok(returning),
            Eligibility::Ineligible(reason) => Err(reason.into()),
        }
    }
}

impl From<Ineligible> for ExchangeError {
    fn from(reason: Ineligible) -> Self {
        match reason {
            Ineligible::Owner => ExchangeError::OwnerCannotJoinOwnChannel,
            Ineligible::AlreadyJoined => ExchangeError::AlreadyMember,
            Ineligible::CompletedRoundServed | Ineligible::ChannelCompleted => {
                ExchangeError::ChannelCompleted
            }
        }
    }
}

pub fn evaluate(input: EligibilityInput, membership: Option<&Membership>) -> Eligibility {
    if input.is_owner {
        return Eligibility::Ineligible(Ineligible::Owner);
    }

    if let Some(m) = membership {
        let returning = Eligibility::Eligible { returning: true };

        if m.left_completed {
            return match m.completed_round {
                Some(done) if done >= input.channel_round => {
                    Eligibility::Ineligible(Ineligible::CompletedRoundServed)
                }
                _ => returning,
            };
        }

        if m.round == input.channel_round {
            if m.left {
                return returning;
            }
            if m.verified {
                return Eligibility::Ineligible(Ineligible::AlreadyJoined);
            }
        } else if m.round < input.channel_round {
            return returning;
        }
    }

    if input.channel_completed {
        return Eligibility::Ineligible(Ineligible::ChannelCompleted);
    }

    Eligibility::Eligible {
        returning: membership.is_some(),
    }
}

//! Exchange event fan-out.
//!
//! Events are published after the state change they describe has been
//! persisted. Publishing never fails a mutation; with no subscribers the
//! event is dropped.

use crate::state::{ChannelId, UserId};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    ChannelCompleted {
        channel: ChannelId,
        owner: UserId,
        round: u32,
    },
    UserJoined {
        user: UserId,
        channel: ChannelId,
        returning: bool,
    },
    UserPenalized {
        user: UserId,
        channel: ChannelId,
        amount: i64,
    },
    ChannelReactivated {
        channel: ChannelId,
        round: u32,
        required: u32,
    },
    ChannelUncompleted {
        channel: ChannelId,
        reason: String,
    },
    ChannelDeleted {
        channel: ChannelId,
        reason: String,
    },
    ReferralCredited {
        referrer: UserId,
        invited: UserId,
        amount: i64,
    },
}

impl ExchangeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChannelCompleted { .. } => "channel_completed",
            Self::UserJoined { .. } => "user_joined",
            Self::UserPenalized { .. } => "user_penalized",
            Self::ChannelReactivated { .. } => "channel_reactivated",
            Self::ChannelUncompleted { .. } => "channel_uncompleted",
            Self::ChannelDeleted { .. } => "channel_deleted",
            Self::ReferralCredited { .. } => "referral_credited",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExchangeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: ExchangeEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            debug!(kind, "event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.tx.subscribe()
    }
}

//! Domain state: identifiers, persisted documents and keyed locks.

mod channel;
mod dashmap_ext;
mod ids;
mod locks;
mod membership;
mod system;
mod user;

pub use channel::{
    Channel, ChannelState, JoinTransition, LeaveTransition, NotCompleted, RoundStats,
    Uncompletion,
};
pub use dashmap_ext::DashMapExt;
pub use ids::{ChannelId, TxId, UserId};
pub use locks::{KeyGuard, LockKey, LockRegistry};
pub use membership::{LeaveKind, Membership};
pub use system::{DeletedChannel, GiftCode, SystemDocument, SystemStats};
pub use user::{DailyGift, Order, TransactionRecord, TxKind, UserRecord, UsersDocument};

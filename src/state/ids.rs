//! Strongly-typed identifiers.
//!
//! Users, channels and transactions are all keyed by opaque strings in the
//! persisted documents. Wrapping them keeps a user id from being passed where
//! a channel id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Platform user identifier.
    UserId
);

string_id!(
    /// Collection channel identifier (one per purchase, reused across rounds).
    ChannelId
);

string_id!(
    /// Caller-supplied idempotency key.
    TxId
);

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl ChannelId {
    /// Allocate a fresh channel id.
    pub fn generate() -> Self {
        Self(format!("ch_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl TxId {
    /// Allocate a random transaction id for callers without a natural key.
    pub fn generate() -> Self {
        Self(format!("tx_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Derive a dependent key (refunds, penalties) from this one.
    ///
    /// Derived keys are deterministic, so retrying the dependent operation
    /// hits the same ledger entry.
    pub fn derive(&self, purpose: &str) -> TxId {
        TxId(format!("{}:{}", purpose, self.0))
    }
}

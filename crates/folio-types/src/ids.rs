//! Typed identifiers.
//!
//! [`HolderId`] wraps a UUIDv7 so lock tables never key on object addresses.
//! The counter-backed ids ([`TaskId`], [`WorkerId`], [`SubscriptionId`],
//! [`AssetId`]) are
//! process-local and strictly increasing, which the task pipeline relies on
//! for submission order and the asset layer for canonical lock ordering.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Identity on whose behalf a read lock is retained (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderId(uuid::Uuid);

impl HolderId {
    /// Create a new time-ordered holder id.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// First 8 hex characters, for human display only, not lookup.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }

    /// A nil holder, for sentinel values only.
    pub fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for HolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HolderId({})", self.short())
    }
}

// ── Counter ids ─────────────────────────────────────────────────────────────

macro_rules! impl_counter_id {
    ($T:ident, $counter:ident, $name:literal) => {
        static $counter: AtomicU64 = AtomicU64::new(1);

        #[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $T(u64);

        impl $T {
            /// Allocate the next id. Ids are never reused within a process.
            pub fn next() -> Self {
                Self($counter.fetch_add(1, Ordering::Relaxed))
            }

            pub fn get(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }
    };
}

impl_counter_id!(TaskId, NEXT_TASK_ID, "TaskId");
impl_counter_id!(WorkerId, NEXT_WORKER_ID, "WorkerId");
impl_counter_id!(SubscriptionId, NEXT_SUBSCRIPTION_ID, "SubscriptionId");
impl_counter_id!(AssetId, NEXT_ASSET_ID, "AssetId");

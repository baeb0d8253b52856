//! Hold store: the key-value layer that backs seat holds.
//!
//! Keys are namespaced by purpose so that everything belonging to one hold
//! can be located from its identifier alone:
//!
//! - `{prefix}seat_lock:{event_id}:{seat_id}` → `{user_id}:{hold_id}`
//! - `{prefix}hold:{hold_id}` → hash of `user_id`, `event_id`, `seat_ids`, `seat_count`, `created_at`
//! - `{prefix}user_holds:{user_id}` → set of hold ids
//!
//! Every key written for a hold carries the hold's TTL; expiry is left to
//! the store.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::models::{EventId, HoldId, HoldRecord, SeatId, SeatLockOwner, UserId};

pub mod memory;
pub mod redis_store;

pub use self::memory::InMemoryHoldStore;
pub use self::redis_store::RedisHoldStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    /// Nothing was written; `seat_id` already had a live lock.
    Contended { seat_id: SeatId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredHold {
    pub record: HoldRecord,
    pub ttl_remaining_ms: i64,
}

/// All-or-nothing hold operations over a TTL key-value store.
///
/// Implementations must make `try_acquire` and `release` atomic with
/// respect to each other across processes: no caller may observe a hold
/// with only part of its seats locked.
#[async_trait]
pub trait HoldStore: Send + Sync {
    /// Locks every seat of `hold` and writes its metadata, or writes nothing.
    async fn try_acquire(&self, hold: &HoldRecord, ttl: Duration) -> Result<AcquireOutcome>;

    /// Tears the hold down. `None` if it does not exist (released or expired),
    /// otherwise the number of seat locks removed.
    async fn release(&self, hold_id: HoldId) -> Result<Option<usize>>;

    async fn fetch(&self, hold_id: HoldId) -> Result<Option<StoredHold>>;

    async fn holds_for_user(&self, user_id: UserId) -> Result<Vec<StoredHold>>;

    /// Current lock owner per seat, in the order of `seat_ids`.
    async fn seat_owners(
        &self,
        event_id: EventId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<Option<SeatLockOwner>>>;

    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct HoldKeys {
    prefix: String,
}

impl HoldKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn seat_lock(&self, event_id: EventId, seat_id: SeatId) -> String {
        format!("{}seat_lock:{}:{}", self.prefix, event_id, seat_id)
    }

    pub fn hold(&self, hold_id: HoldId) -> String {
        format!("{}hold:{}", self.prefix, hold_id)
    }

    pub fn user_index(&self, user_id: UserId) -> String {
        format!("{}user_holds:{}", self.prefix, user_id)
    }
}

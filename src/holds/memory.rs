use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::{AcquireOutcome, HoldStore, StoredHold};
use crate::error::{ReservationError, Result};
use crate::models::{EventId, HoldId, HoldRecord, SeatId, SeatLockOwner, UserId};

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }

    fn remaining_ms(&self, now: Instant) -> i64 {
        i64::try_from(self.expires_at.saturating_duration_since(now).as_millis())
            .unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Default)]
struct Inner {
    locks: HashMap<(EventId, SeatId), Expiring<String>>,
    holds: HashMap<HoldId, Expiring<HoldRecord>>,
    user_index: HashMap<UserId, HashSet<HoldId>>,
}

impl Inner {
    fn reap(&mut self, now: Instant) {
        self.locks.retain(|_, lock| lock.is_live(now));
        self.holds.retain(|_, hold| hold.is_live(now));
        let holds = &self.holds;
        self.user_index.retain(|_, ids| {
            ids.retain(|id| holds.contains_key(id));
            !ids.is_empty()
        });
    }
}

/// Single-process hold store with the same semantics as the Redis store.
///
/// Every operation runs under one mutex, which gives the all-or-nothing
/// behaviour for free. Expiry follows the tokio clock, so tests can pause
/// and advance time.
#[derive(Debug, Default)]
pub struct InMemoryHoldStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl InMemoryHoldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable store: every call fails with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live seat locks.
    pub fn lock_count(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .map(|inner| inner.locks.values().filter(|l| l.is_live(now)).count())
            .unwrap_or(0)
    }

    fn guard(&self) -> Result<MutexGuard<'_, Inner>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ReservationError::redis_unavailable(
                "in-memory hold store is marked unavailable",
            ));
        }
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ReservationError::Storage("hold store mutex poisoned".into()))?;
        inner.reap(Instant::now());
        Ok(inner)
    }
}

#[async_trait]
impl HoldStore for InMemoryHoldStore {
    async fn try_acquire(&self, hold: &HoldRecord, ttl: Duration) -> Result<AcquireOutcome> {
        let mut inner = self.guard()?;

        if let Some(seat_id) = hold
            .seat_ids
            .iter()
            .find(|seat_id| inner.locks.contains_key(&(hold.event_id, **seat_id)))
        {
            return Ok(AcquireOutcome::Contended { seat_id: *seat_id });
        }

        let expires_at = Instant::now() + ttl;
        let lock_value = hold.lock_value();
        for seat_id in &hold.seat_ids {
            inner.locks.insert(
                (hold.event_id, *seat_id),
                Expiring {
                    value: lock_value.clone(),
                    expires_at,
                },
            );
        }
        inner.holds.insert(
            hold.hold_id,
            Expiring {
                value: hold.clone(),
                expires_at,
            },
        );
        inner
            .user_index
            .entry(hold.user_id)
            .or_default()
            .insert(hold.hold_id);

        Ok(AcquireOutcome::Acquired)
    }

    async fn release(&self, hold_id: HoldId) -> Result<Option<usize>> {
        let mut inner = self.guard()?;

        let Some(hold) = inner.holds.remove(&hold_id) else {
            return Ok(None);
        };
        let record = hold.value;
        let lock_value = record.lock_value();

        let mut released = 0;
        for seat_id in &record.seat_ids {
            let key = (record.event_id, *seat_id);
            if inner.locks.get(&key).is_some_and(|lock| lock.value == lock_value) {
                inner.locks.remove(&key);
                released += 1;
            }
        }
        if let Some(ids) = inner.user_index.get_mut(&record.user_id) {
            ids.remove(&hold_id);
        }

        Ok(Some(released))
    }

    async fn fetch(&self, hold_id: HoldId) -> Result<Option<StoredHold>> {
        let inner = self.guard()?;
        let now = Instant::now();
        Ok(inner.holds.get(&hold_id).map(|hold| StoredHold {
            record: hold.value.clone(),
            ttl_remaining_ms: hold.remaining_ms(now),
        }))
    }

    async fn holds_for_user(&self, user_id: UserId) -> Result<Vec<StoredHold>> {
        let inner = self.guard()?;
        let now = Instant::now();
        let mut holds: Vec<StoredHold> = inner
            .user_index
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.holds.get(id))
            .map(|hold| StoredHold {
                record: hold.value.clone(),
                ttl_remaining_ms: hold.remaining_ms(now),
            })
            .collect();
        holds.sort_by_key(|h| h.record.created_at);
        Ok(holds)
    }

    async fn seat_owners(
        &self,
        event_id: EventId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<Option<SeatLockOwner>>> {
        let inner = self.guard()?;
        seat_ids
            .iter()
            .map(|seat_id| {
                inner
                    .locks
                    .get(&(event_id, *seat_id))
                    .map(|lock| lock.value.parse().map_err(ReservationError::Storage))
                    .transpose()
            })
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        self.guard().map(|_| ())
    }
}

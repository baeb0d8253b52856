//! In-process doubles for the external collaborators.
//!
//! Paired with [`crate::holds::InMemoryHoldStore`] and
//! [`crate::repository::InMemoryBookingRepository`] they run the full
//! reservation flow without Postgres or Redis.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::collaborators::{
    ensure_all_found, ChargeReceipt, ChargeRequest, EventDirectory, PaymentError,
    PaymentProcessor, WaitlistError, WaitlistService,
};
use crate::error::{ReservationError, Result};
use crate::models::{
    BookingId, EventCapacityState, EventId, SeatId, SeatInfo, UserId, WaitlistEligibility,
};

#[derive(Debug, Default)]
struct Directory {
    events: HashMap<EventId, EventCapacityState>,
    seats: HashMap<EventId, Vec<SeatInfo>>,
}

/// Event directory over a fixed set of events and seats.
#[derive(Debug, Default)]
pub struct StaticEventDirectory {
    inner: Mutex<Directory>,
}

impl StaticEventDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event(&self, state: EventCapacityState) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.events.insert(state.event_id, state);
        }
    }

    pub fn add_seat(&self, event_id: EventId, seat: SeatInfo) {
        if let Ok(mut inner) = self.inner.lock() {
            let seats = inner.seats.entry(event_id).or_default();
            seats.retain(|s| s.id != seat.id);
            seats.push(seat);
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Directory>> {
        self.inner
            .lock()
            .map_err(|_| ReservationError::Storage("event directory mutex poisoned".into()))
    }
}

#[async_trait]
impl EventDirectory for StaticEventDirectory {
    async fn capacity_state(&self, event_id: EventId) -> Result<EventCapacityState> {
        self.lock()?
            .events
            .get(&event_id)
            .cloned()
            .ok_or(ReservationError::EventNotFound { event_id })
    }

    async fn seats(&self, event_id: EventId, seat_ids: &[SeatId]) -> Result<Vec<SeatInfo>> {
        let inner = self.lock()?;
        let mut found: Vec<SeatInfo> = inner
            .seats
            .get(&event_id)
            .into_iter()
            .flatten()
            .filter(|seat| seat_ids.contains(&seat.id))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.id);
        ensure_all_found(seat_ids, &found)?;
        Ok(found)
    }
}

#[derive(Debug, Default)]
struct WaitlistLog {
    entries: HashMap<(UserId, EventId), WaitlistEligibility>,
    notifications: Vec<(EventId, i32)>,
    converted: Vec<(UserId, EventId, BookingId)>,
}

/// Waitlist that records every call.
#[derive(Debug, Default)]
pub struct MockWaitlist {
    log: Mutex<WaitlistLog>,
    fail_notifications: AtomicBool,
    fail_conversions: AtomicBool,
}

impl MockWaitlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_entry(&self, user_id: UserId, event_id: EventId, entry: WaitlistEligibility) {
        if let Ok(mut log) = self.log.lock() {
            log.entries.insert((user_id, event_id), entry);
        }
    }

    pub fn fail_notifications(&self, fail: bool) {
        self.fail_notifications.store(fail, Ordering::SeqCst);
    }

    pub fn fail_conversions(&self, fail: bool) {
        self.fail_conversions.store(fail, Ordering::SeqCst);
    }

    /// Delivered `(event_id, seat_count)` notices, in delivery order.
    pub fn notifications(&self) -> Vec<(EventId, i32)> {
        self.log
            .lock()
            .map(|log| log.notifications.clone())
            .unwrap_or_default()
    }

    pub fn converted(&self) -> Vec<(UserId, EventId, BookingId)> {
        self.log
            .lock()
            .map(|log| log.converted.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl WaitlistService for MockWaitlist {
    async fn eligibility(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> std::result::Result<Option<WaitlistEligibility>, WaitlistError> {
        let log = self
            .log
            .lock()
            .map_err(|_| WaitlistError("mock waitlist poisoned".into()))?;
        Ok(log.entries.get(&(user_id, event_id)).cloned())
    }

    async fn notify_capacity_freed(
        &self,
        event_id: EventId,
        seat_count: i32,
    ) -> std::result::Result<(), WaitlistError> {
        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(WaitlistError("notification rejected".into()));
        }
        let mut log = self
            .log
            .lock()
            .map_err(|_| WaitlistError("mock waitlist poisoned".into()))?;
        log.notifications.push((event_id, seat_count));
        Ok(())
    }

    async fn mark_converted(
        &self,
        user_id: UserId,
        event_id: EventId,
        booking_id: BookingId,
    ) -> std::result::Result<(), WaitlistError> {
        if self.fail_conversions.load(Ordering::SeqCst) {
            return Err(WaitlistError("conversion rejected".into()));
        }
        let mut log = self
            .log
            .lock()
            .map_err(|_| WaitlistError("mock waitlist poisoned".into()))?;
        log.converted.push((user_id, event_id, booking_id));
        Ok(())
    }
}

/// Payment processor that approves everything unless told to decline.
#[derive(Debug, Default)]
pub struct MockPaymentProcessor {
    decline: AtomicBool,
    sequence: AtomicU64,
    charges: Mutex<Vec<ChargeRequest>>,
}

impl MockPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decline_all(&self, decline: bool) {
        self.decline.store(decline, Ordering::SeqCst);
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn charge(&self, request: &ChargeRequest) -> std::result::Result<ChargeReceipt, PaymentError> {
        if let Ok(mut charges) = self.charges.lock() {
            charges.push(request.clone());
        }
        if self.decline.load(Ordering::SeqCst) {
            return Err(PaymentError::Declined("card declined".into()));
        }
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ChargeReceipt {
            transaction_ref: format!("TXN-{}-{n:04}", request.booking_id),
        })
    }
}

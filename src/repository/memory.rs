use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{BookingRepository, CreatedBooking};
use crate::error::{ReservationError, Result};
use crate::models::{
    Booking, BookingId, BookingStatus, CancelledBooking, EventCapacityState, EventId, NewBooking,
    NewPayment, PaymentId, PaymentRecord, PaymentStatus, SeatId,
};

#[derive(Debug, Default)]
struct Inner {
    events: HashMap<EventId, EventCapacityState>,
    bookings: HashMap<BookingId, Booking>,
    seat_bookings: HashMap<(EventId, SeatId), BookingId>,
    payments: HashMap<PaymentId, PaymentRecord>,
    next_booking_id: BookingId,
    next_payment_id: PaymentId,
}

impl Inner {
    fn event(&self, event_id: EventId) -> Result<&EventCapacityState> {
        self.events
            .get(&event_id)
            .ok_or(ReservationError::EventNotFound { event_id })
    }

    fn insert_booking(&mut self, new: &NewBooking) -> Booking {
        self.next_booking_id += 1;
        let now = Utc::now();
        let mut seat_ids = new.seat_ids.clone();
        seat_ids.sort_unstable();
        let booking = Booking {
            id: self.next_booking_id,
            reference_code: new.reference_code.clone(),
            user_id: new.user_id,
            event_id: new.event_id,
            quantity: new.quantity,
            seat_ids,
            total_cents: new.total_cents,
            status: BookingStatus::Confirmed,
            version: 1,
            created_at: now,
            updated_at: now,
            cancelled_at: None,
        };
        self.bookings.insert(booking.id, booking.clone());
        booking
    }

    fn insert_payment(&mut self, booking_id: BookingId, new: Option<&NewPayment>) -> Option<PaymentRecord> {
        let new = new?;
        self.next_payment_id += 1;
        let payment = PaymentRecord {
            id: self.next_payment_id,
            booking_id,
            amount_cents: new.amount_cents,
            method: new.method.clone(),
            status: PaymentStatus::Pending,
            transaction_ref: None,
            created_at: Utc::now(),
        };
        self.payments.insert(payment.id, payment.clone());
        Some(payment)
    }
}

/// Booking repository backed by process memory.
///
/// One mutex plays the role of the database row locks: every
/// check-then-write runs entirely under it.
#[derive(Debug, Default)]
pub struct InMemoryBookingRepository {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) an event's capacity row.
    pub fn add_event(&self, state: EventCapacityState) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.events.insert(state.event_id, state);
        }
    }

    pub fn event_state(&self, event_id: EventId) -> Option<EventCapacityState> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.events.get(&event_id).cloned())
    }

    pub fn payments_for(&self, booking_id: BookingId) -> Vec<PaymentRecord> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        let mut payments: Vec<PaymentRecord> = inner
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.id);
        payments
    }

    /// Simulates an unreachable database: every call fails with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<MutexGuard<'_, Inner>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ReservationError::postgres_unavailable(
                "in-memory booking store is marked unavailable",
            ));
        }
        self.inner
            .lock()
            .map_err(|_| ReservationError::Storage("booking store mutex poisoned".into()))
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn create_with_capacity_check(
        &self,
        booking: &NewBooking,
        payment: Option<&NewPayment>,
    ) -> Result<CreatedBooking> {
        let quantity = booking.quantity.ok_or_else(|| {
            ReservationError::InvalidInput("quantity booking requires a quantity".into())
        })?;
        let mut inner = self.guard()?;

        let new_count = inner.event(booking.event_id)?.admit(quantity)?;

        let created = inner.insert_booking(booking);
        if let Some(event) = inner.events.get_mut(&booking.event_id) {
            event.booked_count = new_count;
        }
        let payment = inner.insert_payment(created.id, payment);

        Ok(CreatedBooking {
            booking: created,
            payment,
        })
    }

    async fn create_with_seats(
        &self,
        booking: &NewBooking,
        payment: Option<&NewPayment>,
    ) -> Result<CreatedBooking> {
        let mut inner = self.guard()?;

        inner.event(booking.event_id)?.ensure_bookable()?;

        let mut conflicts: Vec<SeatId> = booking
            .seat_ids
            .iter()
            .copied()
            .filter(|seat_id| inner.seat_bookings.contains_key(&(booking.event_id, *seat_id)))
            .collect();
        if !conflicts.is_empty() {
            conflicts.sort_unstable();
            return Err(ReservationError::SeatsAlreadyBooked { seat_ids: conflicts });
        }

        let created = inner.insert_booking(booking);
        for seat_id in &created.seat_ids {
            inner
                .seat_bookings
                .insert((booking.event_id, *seat_id), created.id);
        }
        let payment = inner.insert_payment(created.id, payment);

        Ok(CreatedBooking {
            booking: created,
            payment,
        })
    }

    async fn find(&self, booking_id: BookingId) -> Result<Option<Booking>> {
        let inner = self.guard()?;
        Ok(inner.bookings.get(&booking_id).cloned())
    }

    async fn cancel_if_version(
        &self,
        booking_id: BookingId,
        expected_version: i32,
    ) -> Result<Option<CancelledBooking>> {
        let mut inner = self.guard()?;

        let Some(booking) = inner.bookings.get_mut(&booking_id) else {
            return Ok(None);
        };
        if booking.version != expected_version || booking.status != BookingStatus::Confirmed {
            return Ok(None);
        }

        let now = Utc::now();
        booking.status = BookingStatus::Cancelled;
        booking.version += 1;
        booking.updated_at = now;
        booking.cancelled_at = Some(now);
        // Seat rows go away with the cancel, so later reads see no seats.
        booking.seat_ids.clear();
        let mut cancelled = booking.clone();

        let mut freed_seat_ids: Vec<SeatId> = Vec::new();
        inner.seat_bookings.retain(|(_, seat_id), owner| {
            if *owner == booking_id {
                freed_seat_ids.push(*seat_id);
                false
            } else {
                true
            }
        });
        freed_seat_ids.sort_unstable();
        cancelled.seat_ids = freed_seat_ids.clone();

        let released_quantity = cancelled.quantity.unwrap_or(0);
        if released_quantity > 0 {
            if let Some(event) = inner.events.get_mut(&cancelled.event_id) {
                event.booked_count = (event.booked_count - released_quantity).max(0);
            }
        }

        Ok(Some(CancelledBooking {
            booking: cancelled,
            freed_seat_ids,
            released_quantity,
        }))
    }

    async fn booked_seats(&self, event_id: EventId, seat_ids: &[SeatId]) -> Result<Vec<SeatId>> {
        let inner = self.guard()?;
        let mut booked: Vec<SeatId> = seat_ids
            .iter()
            .copied()
            .filter(|seat_id| inner.seat_bookings.contains_key(&(event_id, *seat_id)))
            .collect();
        booked.sort_unstable();
        booked.dedup();
        Ok(booked)
    }

    async fn update_payment(
        &self,
        payment_id: PaymentId,
        status: PaymentStatus,
        transaction_ref: Option<&str>,
    ) -> Result<PaymentRecord> {
        let mut inner = self.guard()?;
        let payment = inner
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| ReservationError::Storage(format!("payment {payment_id} not found")))?;
        payment.status = status;
        if let Some(reference) = transaction_ref {
            payment.transaction_ref = Some(reference.to_string());
        }
        Ok(payment.clone())
    }

    async fn ping(&self) -> Result<()> {
        self.guard().map(|_| ())
    }
}

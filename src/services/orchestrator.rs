//! Hold → confirm and cancel flows.
//!
//! A hold moves `ABSENT → HELD → CONFIRMED | RELEASED | EXPIRED`; every exit
//! from `HELD` is final for that hold id. Confirmation validates the hold,
//! checks waitlist standing, commits the seat booking and then settles the
//! payment. Work after the commit is best-effort.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::collaborators::{EventDirectory, PaymentProcessor, WaitlistService};
use crate::config::{BookingConfig, Config, HoldConfig, WaitlistConfig};
use crate::error::{ReservationError, Result};
use crate::holds::HoldStore;
use crate::models::{
    Booking, BookingId, BookingStatus, CancelledBooking, EffectiveSeatStatus, EventId,
    HoldDetails, HoldId, HoldInvalidReason, HoldValidation, NewBooking, NewPayment,
    SeatAvailability, SeatId, SeatInfo, SeatStatus, UserId, WaitlistStatus,
};
use crate::repository::BookingRepository;
use crate::services::capacity::{CapacityGate, QuantityBookingRequest};
use crate::services::notifier::{CapacityFreed, NotifierStats, WaitlistNotifier};
use crate::services::payment::{PaymentStep, PaymentSummary};
use crate::services::seat_lock::{HoldRequest, SeatLockManager};
use crate::services::versioned::VersionedMutator;

#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    pub holds: HoldConfig,
    pub bookings: BookingConfig,
    pub waitlist: WaitlistConfig,
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            holds: config.holds.clone(),
            bookings: config.bookings.clone(),
            waitlist: config.waitlist.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingConfirmation {
    pub booking_id: BookingId,
    pub reference_code: String,
    pub event_id: EventId,
    pub seat_ids: Vec<SeatId>,
    pub quantity: Option<i32>,
    pub total_cents: i64,
    pub status: BookingStatus,
    pub version: i32,
    pub payment: PaymentSummary,
}

impl BookingConfirmation {
    fn new(booking: Booking, payment: PaymentSummary) -> Self {
        Self {
            booking_id: booking.id,
            reference_code: booking.reference_code,
            event_id: booking.event_id,
            seat_ids: booking.seat_ids,
            quantity: booking.quantity,
            total_cents: booking.total_cents,
            status: booking.status,
            version: booking.version,
            payment,
        }
    }
}

pub struct ReservationOrchestrator {
    locks: SeatLockManager,
    gate: CapacityGate,
    mutator: VersionedMutator,
    payments: PaymentStep,
    notifier: WaitlistNotifier,
    bookings: Arc<dyn BookingRepository>,
    events: Arc<dyn EventDirectory>,
    waitlist: Arc<dyn WaitlistService>,
}

impl ReservationOrchestrator {
    /// Wires the services over the given stores and collaborators and
    /// starts the waitlist notifier. Must be called inside a tokio runtime.
    pub fn new(
        holds: Arc<dyn HoldStore>,
        bookings: Arc<dyn BookingRepository>,
        events: Arc<dyn EventDirectory>,
        waitlist: Arc<dyn WaitlistService>,
        payments: Arc<dyn PaymentProcessor>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            locks: SeatLockManager::new(holds, settings.holds),
            gate: CapacityGate::new(bookings.clone(), settings.bookings),
            mutator: VersionedMutator::new(bookings.clone()),
            payments: PaymentStep::new(bookings.clone(), payments),
            notifier: WaitlistNotifier::spawn(
                waitlist.clone(),
                settings.waitlist.notify_queue_capacity,
            ),
            bookings,
            events,
            waitlist,
        }
    }

    /// Holds seats after checking they exist, are not blocked and are not
    /// already booked. The booking transaction still has the final say.
    pub async fn hold_seats(&self, request: HoldRequest) -> Result<HoldDetails> {
        self.locks.validate_request(&request)?;

        self.events
            .capacity_state(request.event_id)
            .await?
            .ensure_bookable()?;

        let seats = self.events.seats(request.event_id, &request.seat_ids).await?;
        ensure_not_blocked(&seats)?;

        let booked = self
            .bookings
            .booked_seats(request.event_id, &request.seat_ids)
            .await?;
        if !booked.is_empty() {
            return Err(ReservationError::SeatsAlreadyBooked { seat_ids: booked });
        }

        self.locks.hold_seats(request).await
    }

    /// Only the owner may release; anyone else sees `HoldNotFound`.
    pub async fn release_hold(&self, hold_id: HoldId, acting_user: UserId) -> Result<usize> {
        let hold = self.locks.hold_details(hold_id).await?;
        if hold.user_id != acting_user {
            return Err(ReservationError::HoldNotFound { hold_id });
        }
        self.locks.release_hold(hold_id).await
    }

    pub async fn validate_hold(&self, hold_id: HoldId, user_id: UserId) -> Result<HoldValidation> {
        self.locks.validate_hold(hold_id, user_id).await
    }

    pub async fn user_holds(&self, user_id: UserId) -> Result<Vec<HoldDetails>> {
        self.locks.user_holds(user_id).await
    }

    pub async fn hold_details(&self, hold_id: HoldId) -> Result<HoldDetails> {
        self.locks.hold_details(hold_id).await
    }

    /// Effective status per seat, ordered by seat id.
    pub async fn check_seat_availability(
        &self,
        event_id: EventId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatAvailability>> {
        if seat_ids.is_empty() {
            return Ok(Vec::new());
        }

        let (seats, held, booked) = futures::try_join!(
            self.events.seats(event_id, seat_ids),
            self.locks.check_seat_holds(event_id, seat_ids),
            self.bookings.booked_seats(event_id, seat_ids),
        )?;

        Ok(seats
            .into_iter()
            .map(|seat| {
                let held_by = held.get(&seat.id).copied();
                let status = EffectiveSeatStatus::derive(
                    seat.status,
                    held_by.is_some(),
                    booked.contains(&seat.id),
                );
                SeatAvailability {
                    seat_id: seat.id,
                    status,
                    held_by,
                }
            })
            .collect())
    }

    pub async fn confirm_booking(
        &self,
        user_id: UserId,
        hold_id: HoldId,
        event_id: EventId,
        payment_method: &str,
    ) -> Result<BookingConfirmation> {
        let payment_method = payment_method.trim();
        if payment_method.is_empty() {
            return Err(ReservationError::InvalidInput("payment method is required".into()));
        }

        // 1. Холд должен быть жив и принадлежать пользователю
        let validation = self.locks.validate_hold(hold_id, user_id).await?;
        let Some(hold) = validation.hold.filter(|_| validation.valid) else {
            return Err(ReservationError::HoldRejected {
                hold_id,
                reason: validation.reason.unwrap_or(HoldInvalidReason::Missing),
            });
        };

        // 2. Холд выдан именно на это событие
        if hold.event_id != event_id {
            return Err(ReservationError::HoldEventMismatch {
                held_for: hold.event_id,
                requested: event_id,
            });
        }

        // 3. Лист ожидания
        let waitlisted = self.check_waitlist(user_id, event_id).await?;

        // 4. Цены мест и транзакция бронирования
        let seats = self.events.seats(event_id, &hold.seat_ids).await?;
        ensure_not_blocked(&seats)?;
        let total_cents: i64 = seats.iter().map(|s| s.price_cents).sum();

        let booking = NewBooking::for_seats(user_id, event_id, hold.seat_ids.clone(), total_cents);
        let payment = NewPayment {
            amount_cents: total_cents,
            method: payment_method.to_string(),
        };
        let created = self.gate.create_atomic(&booking, Some(&payment)).await?;

        let settled = match created.payment {
            Some(pending) => self.payments.settle(&created.booking, pending).await,
            None => Err(ReservationError::Storage(format!(
                "booking {} committed without a payment record",
                created.booking.id
            ))),
        };

        // 5. Best-effort: the booking is already committed
        self.after_commit(user_id, event_id, created.booking.id, waitlisted, Some(hold_id))
            .await;

        let payment = settled?;
        info!(
            booking_id = created.booking.id,
            reference = %created.booking.reference_code,
            hold_id = %hold_id,
            "✅ Booking confirmed"
        );
        Ok(BookingConfirmation::new(created.booking, payment))
    }

    /// General admission: books `quantity` units against the event counter.
    pub async fn book_general_admission(
        &self,
        request: QuantityBookingRequest,
    ) -> Result<BookingConfirmation> {
        self.gate.validate_quantity(&request)?;

        let waitlisted = self.check_waitlist(request.user_id, request.event_id).await?;

        let event = self.events.capacity_state(request.event_id).await?;
        let total_cents = event
            .unit_price_cents
            .saturating_mul(i64::from(request.quantity));

        let booking = NewBooking::for_quantity(
            request.user_id,
            request.event_id,
            request.quantity,
            total_cents,
        );
        let payment = NewPayment {
            amount_cents: total_cents,
            method: request.payment_method.clone(),
        };
        let created = self
            .gate
            .create_booking_with_capacity_check(&booking, Some(&payment))
            .await?;

        let settled = match created.payment {
            Some(pending) => self.payments.settle(&created.booking, pending).await,
            None => Err(ReservationError::Storage(format!(
                "booking {} committed without a payment record",
                created.booking.id
            ))),
        };

        self.after_commit(request.user_id, request.event_id, created.booking.id, waitlisted, None)
            .await;

        let payment = settled?;
        Ok(BookingConfirmation::new(created.booking, payment))
    }

    pub async fn get_booking(&self, booking_id: BookingId, acting_user: UserId) -> Result<Booking> {
        self.bookings
            .find(booking_id)
            .await?
            .filter(|b| b.user_id == acting_user)
            .ok_or(ReservationError::BookingNotFound { booking_id })
    }

    /// Cancels and, without waiting, tells the waitlist how much was freed.
    pub async fn cancel_booking(
        &self,
        booking_id: BookingId,
        expected_version: i32,
        acting_user: UserId,
    ) -> Result<CancelledBooking> {
        let cancelled = self
            .mutator
            .cancel(booking_id, expected_version, acting_user)
            .await?;
        self.notify_freed(&cancelled);
        Ok(cancelled)
    }

    pub async fn update_booking_status(
        &self,
        booking_id: BookingId,
        expected_version: i32,
        acting_user: UserId,
        target: BookingStatus,
    ) -> Result<Booking> {
        let cancelled = self
            .mutator
            .update_status(booking_id, expected_version, acting_user, target)
            .await?;
        self.notify_freed(&cancelled);
        Ok(cancelled.booking)
    }

    pub fn notifier_stats(&self) -> NotifierStats {
        self.notifier.stats()
    }

    /// Flushes pending waitlist notifications.
    pub async fn shutdown(&self) {
        self.notifier.shutdown().await;
    }

    /// `true` when the user books through a live waitlist entry.
    async fn check_waitlist(&self, user_id: UserId, event_id: EventId) -> Result<bool> {
        let entry = self
            .waitlist
            .eligibility(user_id, event_id)
            .await
            .map_err(|e| ReservationError::StoreUnavailable {
                store: "waitlist",
                message: e.to_string(),
            })?;

        match entry {
            None => Ok(false),
            Some(entry) => {
                entry.check().map_err(ReservationError::WaitlistIneligible)?;
                Ok(entry.status != WaitlistStatus::Cancelled)
            }
        }
    }

    async fn after_commit(
        &self,
        user_id: UserId,
        event_id: EventId,
        booking_id: BookingId,
        waitlisted: bool,
        hold_id: Option<HoldId>,
    ) {
        if waitlisted {
            if let Err(e) = self.waitlist.mark_converted(user_id, event_id, booking_id).await {
                warn!(user_id, event_id, booking_id, error = %e, "Failed to mark waitlist entry converted");
            }
        }
        if let Some(hold_id) = hold_id {
            // An unreleased hold simply expires; its seats are booked anyway.
            if let Err(e) = self.locks.release_hold(hold_id).await {
                warn!(hold_id = %hold_id, booking_id, error = %e, "Failed to release hold after booking");
            }
        }
    }

    fn notify_freed(&self, cancelled: &CancelledBooking) {
        let seat_count = cancelled.freed_units();
        if seat_count == 0 {
            return;
        }
        self.notifier.submit(CapacityFreed {
            event_id: cancelled.booking.event_id,
            booking_id: cancelled.booking.id,
            seat_count,
        });
    }
}

fn ensure_not_blocked(seats: &[SeatInfo]) -> Result<()> {
    let blocked: Vec<SeatId> = seats
        .iter()
        .filter(|s| s.status == SeatStatus::Blocked)
        .map(|s| s.id)
        .collect();
    if blocked.is_empty() {
        Ok(())
    } else {
        Err(ReservationError::SeatBlocked { seat_ids: blocked })
    }
}

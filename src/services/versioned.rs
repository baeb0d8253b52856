//! Optimistic-concurrency mutations of existing bookings.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ReservationError, Result};
use crate::models::{BookingId, BookingStatus, CancelledBooking, UserId};
use crate::repository::BookingRepository;

pub struct VersionedMutator {
    repo: Arc<dyn BookingRepository>,
}

impl VersionedMutator {
    pub fn new(repo: Arc<dyn BookingRepository>) -> Self {
        Self { repo }
    }

    pub async fn cancel(
        &self,
        booking_id: BookingId,
        expected_version: i32,
        acting_user: UserId,
    ) -> Result<CancelledBooking> {
        self.update_status(booking_id, expected_version, acting_user, BookingStatus::Cancelled)
            .await
    }

    /// Moves the booking to `target` if nobody changed it since the caller
    /// read `expected_version`. `CANCELLED` is the only state reachable after
    /// creation, so a successful update is always a cancellation.
    pub async fn update_status(
        &self,
        booking_id: BookingId,
        expected_version: i32,
        acting_user: UserId,
        target: BookingStatus,
    ) -> Result<CancelledBooking> {
        let current = self
            .repo
            .find(booking_id)
            .await?
            .filter(|b| b.user_id == acting_user)
            .ok_or(ReservationError::BookingNotFound { booking_id })?;

        // Быстрая проверка версии до любых блокировок
        if current.version != expected_version {
            debug!(
                booking_id,
                expected_version,
                actual = current.version,
                "Stale version, update skipped"
            );
            return Err(ReservationError::VersionMismatch {
                booking_id,
                expected: expected_version,
                actual: Some(current.version),
            });
        }

        if !current.status.can_transition_to(target) {
            return match (current.status, target) {
                (BookingStatus::Cancelled, BookingStatus::Cancelled) => {
                    Err(ReservationError::AlreadyCancelled { booking_id })
                }
                (from, to) => Err(ReservationError::InvalidInput(format!(
                    "booking cannot move from {from} to {to}"
                ))),
            };
        }

        let Some(cancelled) = self.repo.cancel_if_version(booking_id, expected_version).await? else {
            // Lost the race between the read above and the conditional update.
            let actual = self.repo.find(booking_id).await?.map(|b| b.version);
            debug!(booking_id, expected_version, ?actual, "Conditional update matched no row");
            return Err(ReservationError::VersionMismatch {
                booking_id,
                expected: expected_version,
                actual,
            });
        };

        info!(
            booking_id,
            version = cancelled.booking.version,
            freed_seats = ?cancelled.freed_seat_ids,
            released_quantity = cancelled.released_quantity,
            "Booking cancelled"
        );
        Ok(cancelled)
    }
}

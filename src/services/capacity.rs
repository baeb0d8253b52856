//! Booking creation against the relational store.
//!
//! Both booking shapes keep the check and the write that consumes the
//! capacity inside one transaction; the repository owns the transaction.

use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use crate::config::BookingConfig;
use crate::error::{ReservationError, Result};
use crate::models::{EventId, NewBooking, NewPayment, UserId};
use crate::repository::{BookingRepository, CreatedBooking};

/// Общий запрос на бронирование без мест (general admission).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct QuantityBookingRequest {
    #[validate(range(min = 1))]
    pub user_id: UserId,
    #[validate(range(min = 1))]
    pub event_id: EventId,
    #[validate(range(min = 1))]
    pub quantity: i32,
    #[validate(length(min = 1, max = 64))]
    pub payment_method: String,
}

pub struct CapacityGate {
    repo: Arc<dyn BookingRepository>,
    config: BookingConfig,
}

impl CapacityGate {
    pub fn new(repo: Arc<dyn BookingRepository>, config: BookingConfig) -> Self {
        Self { repo, config }
    }

    pub fn validate_quantity(&self, request: &QuantityBookingRequest) -> Result<()> {
        request.validate()?;
        if request.quantity > self.config.max_quantity {
            return Err(ReservationError::InvalidInput(format!(
                "at most {} tickets per booking, got {}",
                self.config.max_quantity, request.quantity
            )));
        }
        Ok(())
    }

    /// Quantity model: the event row lock serialises every attempt, so
    /// `booked_count` never exceeds `total_capacity`.
    pub async fn create_booking_with_capacity_check(
        &self,
        booking: &NewBooking,
        payment: Option<&NewPayment>,
    ) -> Result<CreatedBooking> {
        let quantity = match booking.quantity {
            Some(q) if (1..=self.config.max_quantity).contains(&q) => q,
            other => {
                return Err(ReservationError::InvalidInput(format!(
                    "quantity must be within 1..={}, got {other:?}",
                    self.config.max_quantity
                )))
            }
        };
        if !booking.seat_ids.is_empty() {
            return Err(ReservationError::InvalidInput(
                "quantity bookings do not carry seats".into(),
            ));
        }

        match self.repo.create_with_capacity_check(booking, payment).await {
            Ok(created) => {
                info!(
                    booking_id = created.booking.id,
                    reference = %created.booking.reference_code,
                    event_id = booking.event_id,
                    quantity,
                    "Capacity booking created"
                );
                Ok(created)
            }
            Err(e) => {
                warn!(event_id = booking.event_id, quantity, error = %e, "Capacity booking rejected");
                Err(e)
            }
        }
    }

    /// Seat-level model: fails with `SeatsAlreadyBooked` naming the contended
    /// seats if any `(seat, event)` pair is taken by a live booking.
    pub async fn create_atomic(
        &self,
        booking: &NewBooking,
        payment: Option<&NewPayment>,
    ) -> Result<CreatedBooking> {
        if booking.seat_ids.is_empty() {
            return Err(ReservationError::InvalidInput(
                "seat booking requires at least one seat".into(),
            ));
        }
        if booking.quantity.is_some() {
            return Err(ReservationError::InvalidInput(
                "seat bookings do not carry a quantity".into(),
            ));
        }
        let mut seen = HashSet::with_capacity(booking.seat_ids.len());
        if !booking.seat_ids.iter().all(|id| seen.insert(*id)) {
            return Err(ReservationError::InvalidInput("duplicate seat ids".into()));
        }

        match self.repo.create_with_seats(booking, payment).await {
            Ok(created) => {
                info!(
                    booking_id = created.booking.id,
                    reference = %created.booking.reference_code,
                    event_id = booking.event_id,
                    seats = ?booking.seat_ids,
                    "Seat booking created"
                );
                Ok(created)
            }
            Err(e) => {
                warn!(event_id = booking.event_id, seats = ?booking.seat_ids, error = %e, "Seat booking rejected");
                Err(e)
            }
        }
    }
}

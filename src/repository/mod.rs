//! Booking persistence.
//!
//! Transactions, row locks and conditional updates stay behind
//! [`BookingRepository`]; the services above it only see domain records.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Booking, BookingId, CancelledBooking, EventId, NewBooking, NewPayment, PaymentId,
    PaymentRecord, PaymentStatus, SeatId,
};

pub mod memory;
pub mod postgres;

pub use self::memory::InMemoryBookingRepository;
pub use self::postgres::PgBookingRepository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedBooking {
    pub booking: Booking,
    pub payment: Option<PaymentRecord>,
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Quantity model. In one transaction: lock the event row, check
    /// `booked_count + quantity <= total_capacity`, insert the booking and
    /// write the new count. Nothing is written on rejection.
    async fn create_with_capacity_check(
        &self,
        booking: &NewBooking,
        payment: Option<&NewPayment>,
    ) -> Result<CreatedBooking>;

    /// Seat-level model. In one transaction: reject if any requested
    /// `(seat, event)` pair already belongs to a live booking, then insert
    /// the booking, its seat rows and the payment record.
    async fn create_with_seats(
        &self,
        booking: &NewBooking,
        payment: Option<&NewPayment>,
    ) -> Result<CreatedBooking>;

    async fn find(&self, booking_id: BookingId) -> Result<Option<Booking>>;

    /// `CONFIRMED -> CANCELLED` guarded by `version = expected_version`,
    /// bumping the version by one and freeing the booking's seats and
    /// capacity in the same transaction. `None` when no row matched.
    async fn cancel_if_version(
        &self,
        booking_id: BookingId,
        expected_version: i32,
    ) -> Result<Option<CancelledBooking>>;

    /// Subset of `seat_ids` booked by a live booking for the event.
    async fn booked_seats(&self, event_id: EventId, seat_ids: &[SeatId]) -> Result<Vec<SeatId>>;

    async fn update_payment(
        &self,
        payment_id: PaymentId,
        status: PaymentStatus,
        transaction_ref: Option<&str>,
    ) -> Result<PaymentRecord>;

    async fn ping(&self) -> Result<()>;
}

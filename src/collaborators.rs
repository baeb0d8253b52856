//! Contracts of the systems this core talks to but does not own.
//!
//! Events and venues are read-only from here. The waitlist keeps its own
//! queue; the core only asks about eligibility and reports freed capacity.
//! Payment is an opaque step that succeeds or fails.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;

use crate::error::{ReservationError, Result};
use crate::models::{
    BookingId, EventCapacityRow, EventCapacityState, EventId, SeatId, SeatInfo, SeatRow, UserId,
    WaitlistEligibility,
};

#[async_trait]
pub trait EventDirectory: Send + Sync {
    async fn capacity_state(&self, event_id: EventId) -> Result<EventCapacityState>;

    /// Seats of the event's venue, ordered by id. Fails with `SeatNotFound`
    /// naming every requested id that does not belong to the venue.
    async fn seats(&self, event_id: EventId, seat_ids: &[SeatId]) -> Result<Vec<SeatInfo>>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("waitlist: {0}")]
pub struct WaitlistError(pub String);

#[async_trait]
pub trait WaitlistService: Send + Sync {
    /// `None` when the user has no waitlist entry for the event.
    async fn eligibility(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> std::result::Result<Option<WaitlistEligibility>, WaitlistError>;

    async fn notify_capacity_freed(
        &self,
        event_id: EventId,
        seat_count: i32,
    ) -> std::result::Result<(), WaitlistError>;

    async fn mark_converted(
        &self,
        user_id: UserId,
        event_id: EventId,
        booking_id: BookingId,
    ) -> std::result::Result<(), WaitlistError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub amount_cents: i64,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub transaction_ref: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("payment declined: {0}")]
    Declined(String),
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> std::result::Result<ChargeReceipt, PaymentError>;
}

/// Event directory reading the venue tables directly.
#[derive(Clone)]
pub struct PgEventDirectory {
    pool: PgPool,
}

impl PgEventDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventDirectory for PgEventDirectory {
    async fn capacity_state(&self, event_id: EventId) -> Result<EventCapacityState> {
        let row: Option<EventCapacityRow> = sqlx::query_as(
            "SELECT id, status, total_capacity, booked_count, unit_price_cents
             FROM events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(ReservationError::EventNotFound { event_id })?
            .try_into()
    }

    async fn seats(&self, event_id: EventId, seat_ids: &[SeatId]) -> Result<Vec<SeatInfo>> {
        let rows: Vec<SeatRow> = sqlx::query_as(
            r#"
            SELECT s.id, s.section_id, s.row_label, s.seat_number, s.status, sec.price_cents
            FROM seats s
            JOIN sections sec ON sec.id = s.section_id
            JOIN events e ON e.venue_id = sec.venue_id
            WHERE e.id = $1 AND s.id = ANY($2)
            ORDER BY s.id
            "#,
        )
        .bind(event_id)
        .bind(seat_ids)
        .fetch_all(&self.pool)
        .await?;

        let seats = rows
            .into_iter()
            .map(SeatInfo::try_from)
            .collect::<Result<Vec<_>>>()?;
        ensure_all_found(seat_ids, &seats)?;
        Ok(seats)
    }
}

/// `SeatNotFound` listing the requested ids missing from `found`.
pub fn ensure_all_found(requested: &[SeatId], found: &[SeatInfo]) -> Result<()> {
    let mut missing: Vec<SeatId> = requested
        .iter()
        .copied()
        .filter(|id| !found.iter().any(|seat| seat.id == *id))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    missing.sort_unstable();
    missing.dedup();
    Err(ReservationError::SeatNotFound { seat_ids: missing })
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{BookingId, EventId, SeatId, UserId};
use crate::error::ReservationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    /// Bookings only ever move CONFIRMED -> CANCELLED.
    pub fn can_transition_to(&self, target: BookingStatus) -> bool {
        matches!(
            (self, target),
            (BookingStatus::Confirmed, BookingStatus::Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = ReservationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            other => Err(ReservationError::Storage(format!(
                "unknown booking status '{other}'"
            ))),
        }
    }
}

/// Row shape of `bookings`; seats live in `seat_bookings`.
#[derive(Debug, Clone, FromRow)]
pub struct BookingRow {
    pub id: BookingId,
    pub reference_code: String,
    pub user_id: UserId,
    pub event_id: EventId,
    pub quantity: Option<i32>,
    pub total_cents: i64,
    pub status: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl BookingRow {
    pub fn into_booking(self, seat_ids: Vec<SeatId>) -> Result<Booking, ReservationError> {
        Ok(Booking {
            status: self.status.parse()?,
            id: self.id,
            reference_code: self.reference_code,
            user_id: self.user_id,
            event_id: self.event_id,
            quantity: self.quantity,
            seat_ids,
            total_cents: self.total_cents,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            cancelled_at: self.cancelled_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub reference_code: String,
    pub user_id: UserId,
    pub event_id: EventId,
    /// Set for quantity bookings, `None` for seat-level bookings.
    pub quantity: Option<i32>,
    pub seat_ids: Vec<SeatId>,
    pub total_cents: i64,
    pub status: BookingStatus,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// A booking about to be inserted by the capacity gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub reference_code: String,
    pub user_id: UserId,
    pub event_id: EventId,
    pub quantity: Option<i32>,
    pub seat_ids: Vec<SeatId>,
    pub total_cents: i64,
}

impl NewBooking {
    pub fn for_seats(user_id: UserId, event_id: EventId, seat_ids: Vec<SeatId>, total_cents: i64) -> Self {
        Self {
            reference_code: generate_reference_code(),
            user_id,
            event_id,
            quantity: None,
            seat_ids,
            total_cents,
        }
    }

    pub fn for_quantity(user_id: UserId, event_id: EventId, quantity: i32, total_cents: i64) -> Self {
        Self {
            reference_code: generate_reference_code(),
            user_id,
            event_id,
            quantity: Some(quantity),
            seat_ids: Vec::new(),
            total_cents,
        }
    }
}

/// Result of a successful conditional cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelledBooking {
    pub booking: Booking,
    /// Seat-booking rows deleted in the cancel transaction.
    pub freed_seat_ids: Vec<SeatId>,
    /// Units returned to the event counter (quantity bookings only).
    pub released_quantity: i32,
}

impl CancelledBooking {
    pub fn freed_units(&self) -> i32 {
        i32::try_from(self.freed_seat_ids.len()).unwrap_or(i32::MAX) + self.released_quantity
    }
}

/// `BK-` followed by 8 upper-case hex characters.
pub fn generate_reference_code() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("BK-{}", digest[..8].to_uppercase())
}

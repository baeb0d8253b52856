use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

use super::{SeatId, SeatLockOwner};
use crate::error::ReservationError;

/// Structural status stored on the seat row. Blocking is an admin action
/// that is independent of bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Blocked,
}

impl FromStr for SeatStatus {
    type Err = ReservationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(SeatStatus::Available),
            "BLOCKED" => Ok(SeatStatus::Blocked),
            other => Err(ReservationError::Storage(format!("unknown seat status '{other}'"))),
        }
    }
}

/// Status of a seat for one event, derived on read and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveSeatStatus {
    Available,
    Booked,
    Held,
    Blocked,
}

impl EffectiveSeatStatus {
    /// Precedence is BLOCKED > HELD > BOOKED > AVAILABLE.
    pub fn derive(structural: SeatStatus, held: bool, booked: bool) -> Self {
        if structural == SeatStatus::Blocked {
            EffectiveSeatStatus::Blocked
        } else if held {
            EffectiveSeatStatus::Held
        } else if booked {
            EffectiveSeatStatus::Booked
        } else {
            EffectiveSeatStatus::Available
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SeatRow {
    pub id: SeatId,
    pub section_id: i64,
    pub row_label: String,
    pub seat_number: i32,
    pub status: String,
    pub price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatInfo {
    pub id: SeatId,
    pub section_id: i64,
    pub row_label: String,
    pub seat_number: i32,
    pub status: SeatStatus,
    pub price_cents: i64,
}

impl TryFrom<SeatRow> for SeatInfo {
    type Error = ReservationError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            section_id: row.section_id,
            row_label: row.row_label,
            seat_number: row.seat_number,
            status: row.status.parse()?,
            price_cents: row.price_cents,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatAvailability {
    pub seat_id: SeatId,
    pub status: EffectiveSeatStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_by: Option<SeatLockOwner>,
}

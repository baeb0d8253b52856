use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use super::EventId;
use crate::error::ReservationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Draft,
    OnSale,
    SoldOut,
    Closed,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Draft => "DRAFT",
            EventStatus::OnSale => "ON_SALE",
            EventStatus::SoldOut => "SOLD_OUT",
            EventStatus::Closed => "CLOSED",
            EventStatus::Cancelled => "CANCELLED",
        }
    }

    // SOLD_OUT stays bookable: the counters decide, and cancellations free capacity.
    pub fn is_bookable(&self) -> bool {
        matches!(self, EventStatus::OnSale | EventStatus::SoldOut)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = ReservationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(EventStatus::Draft),
            "ON_SALE" => Ok(EventStatus::OnSale),
            "SOLD_OUT" => Ok(EventStatus::SoldOut),
            "CLOSED" => Ok(EventStatus::Closed),
            "CANCELLED" => Ok(EventStatus::Cancelled),
            other => Err(ReservationError::Storage(format!("unknown event status '{other}'"))),
        }
    }
}

/// Row shape of `events` as read under `FOR UPDATE`.
#[derive(Debug, Clone, FromRow)]
pub struct EventCapacityRow {
    pub id: EventId,
    pub status: String,
    pub total_capacity: i32,
    pub booked_count: i32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCapacityState {
    pub event_id: EventId,
    pub status: EventStatus,
    pub total_capacity: i32,
    pub booked_count: i32,
    pub unit_price_cents: i64,
}

impl TryFrom<EventCapacityRow> for EventCapacityState {
    type Error = ReservationError;

    fn try_from(row: EventCapacityRow) -> Result<Self, Self::Error> {
        Ok(Self {
            event_id: row.id,
            status: row.status.parse()?,
            total_capacity: row.total_capacity,
            booked_count: row.booked_count,
            unit_price_cents: row.unit_price_cents,
        })
    }
}

impl EventCapacityState {
    pub fn remaining(&self) -> i32 {
        (self.total_capacity - self.booked_count).max(0)
    }

    pub fn ensure_bookable(&self) -> Result<(), ReservationError> {
        if self.status.is_bookable() {
            Ok(())
        } else {
            Err(ReservationError::EventNotBookable {
                event_id: self.event_id,
                status: self.status.to_string(),
            })
        }
    }

    /// Admits `quantity` more units and returns the new `booked_count`.
    ///
    /// Must run while the event row is locked; the returned count is what
    /// gets written back in the same transaction.
    pub fn admit(&self, quantity: i32) -> Result<i32, ReservationError> {
        self.ensure_bookable()?;
        if quantity <= 0 {
            return Err(ReservationError::InvalidInput(format!(
                "quantity must be positive, got {quantity}"
            )));
        }
        let new_count = self.booked_count + quantity;
        if new_count > self.total_capacity {
            let remaining = self.remaining();
            if remaining == 0 {
                return Err(ReservationError::FullyBooked {
                    event_id: self.event_id,
                });
            }
            return Err(ReservationError::InsufficientCapacity {
                requested: quantity,
                remaining,
            });
        }
        Ok(new_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(total: i32, booked: i32) -> EventCapacityState {
        EventCapacityState {
            event_id: 1,
            status: EventStatus::OnSale,
            total_capacity: total,
            booked_count: booked,
            unit_price_cents: 5_000,
        }
    }

    #[test]
    fn admit_up_to_capacity() {
        assert_eq!(state(10, 8).admit(2).unwrap(), 10);
    }

    #[test]
    fn admit_rejects_overflow_with_remaining() {
        match state(10, 8).admit(3) {
            Err(ReservationError::InsufficientCapacity { requested, remaining }) => {
                assert_eq!(requested, 3);
                assert_eq!(remaining, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn admit_reports_fully_booked_when_nothing_left() {
        assert!(matches!(
            state(1, 1).admit(1),
            Err(ReservationError::FullyBooked { event_id: 1 })
        ));
    }

    #[test]
    fn closed_event_is_not_bookable() {
        let mut s = state(10, 0);
        s.status = EventStatus::Closed;
        assert!(matches!(
            s.admit(1),
            Err(ReservationError::EventNotBookable { .. })
        ));
    }
}

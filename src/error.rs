//! Error taxonomy for the reservation core.
//!
//! Every failure surfaced to callers is a [`ReservationError`]. The HTTP layer
//! that embeds this crate maps [`ErrorKind`] to status codes; it never has to
//! inspect individual variants to decide whether a retry makes sense.

use crate::models::{BookingId, EventId, HoldId, HoldInvalidReason, SeatId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReservationError>;

/// Coarse classification used by callers to pick a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input. Never retried, the caller must fix the request.
    Validation,
    /// Contention on a seat, capacity or version. Refresh state, then retry.
    Conflict,
    /// The addressed seat, booking, hold or event does not exist.
    NotFound,
    /// A backing store could not be reached. Try again later.
    StoreUnavailable,
    /// The opaque payment step declined or failed.
    Payment,
    Internal,
}

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("seat {seat_id} is already held")]
    SeatAlreadyHeld { seat_id: SeatId },

    #[error("seats already booked: {seat_ids:?}")]
    SeatsAlreadyBooked { seat_ids: Vec<SeatId> },

    #[error("seats are blocked: {seat_ids:?}")]
    SeatBlocked { seat_ids: Vec<SeatId> },

    #[error("insufficient capacity: requested {requested}, remaining {remaining}")]
    InsufficientCapacity { requested: i32, remaining: i32 },

    #[error("event {event_id} is fully booked")]
    FullyBooked { event_id: EventId },

    #[error("booking {booking_id} version mismatch: expected {expected}, found {actual:?}")]
    VersionMismatch {
        booking_id: BookingId,
        expected: i32,
        actual: Option<i32>,
    },

    /// Postgres aborted the transaction to break a deadlock or a
    /// serialization failure; nothing was written.
    #[error("transaction aborted by a concurrent writer: {0}")]
    TransactionConflict(String),

    #[error("booking {booking_id} is already cancelled")]
    AlreadyCancelled { booking_id: BookingId },

    #[error("hold {hold_id} is not valid: {reason}")]
    HoldRejected {
        hold_id: HoldId,
        reason: HoldInvalidReason,
    },

    #[error("hold belongs to event {held_for}, not {requested}")]
    HoldEventMismatch { held_for: EventId, requested: EventId },

    #[error("waitlist does not allow booking: {0}")]
    WaitlistIneligible(String),

    #[error("event {event_id} not found")]
    EventNotFound { event_id: EventId },

    #[error("event {event_id} is not bookable (status {status})")]
    EventNotBookable { event_id: EventId, status: String },

    #[error("seats not found: {seat_ids:?}")]
    SeatNotFound { seat_ids: Vec<SeatId> },

    #[error("booking {booking_id} not found")]
    BookingNotFound { booking_id: BookingId },

    #[error("hold {hold_id} not found")]
    HoldNotFound { hold_id: HoldId },

    #[error("payment for booking {booking_id} failed: {reason}")]
    PaymentFailed { booking_id: BookingId, reason: String },

    #[error("{store} is unavailable: {message}")]
    StoreUnavailable { store: &'static str, message: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl ReservationError {
    pub fn kind(&self) -> ErrorKind {
        use ReservationError::*;
        match self {
            InvalidInput(_) | HoldEventMismatch { .. } | WaitlistIneligible(_) => {
                ErrorKind::Validation
            }
            SeatAlreadyHeld { .. }
            | SeatsAlreadyBooked { .. }
            | SeatBlocked { .. }
            | InsufficientCapacity { .. }
            | FullyBooked { .. }
            | VersionMismatch { .. }
            | TransactionConflict(_)
            | AlreadyCancelled { .. }
            | EventNotBookable { .. } => ErrorKind::Conflict,
            HoldRejected { reason, .. } => match reason {
                HoldInvalidReason::WrongOwner => ErrorKind::Validation,
                HoldInvalidReason::Missing | HoldInvalidReason::Expired => ErrorKind::NotFound,
            },
            EventNotFound { .. }
            | SeatNotFound { .. }
            | BookingNotFound { .. }
            | HoldNotFound { .. } => ErrorKind::NotFound,
            PaymentFailed { .. } => ErrorKind::Payment,
            StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Storage(_) => ErrorKind::Internal,
        }
    }

    /// Whether the same request may succeed after the caller refreshes state
    /// or waits. The core itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::StoreUnavailable)
    }

    pub(crate) fn postgres_unavailable(message: impl Into<String>) -> Self {
        ReservationError::StoreUnavailable {
            store: "postgres",
            message: message.into(),
        }
    }

    pub(crate) fn redis_unavailable(message: impl Into<String>) -> Self {
        ReservationError::StoreUnavailable {
            store: "redis",
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for ReservationError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => ReservationError::postgres_unavailable(e.to_string()),
            // 57014 query_canceled: statement_timeout fired
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("57014") => {
                ReservationError::postgres_unavailable(e.to_string())
            }
            // 40P01 deadlock_detected, 40001 serialization_failure
            sqlx::Error::Database(ref db)
                if matches!(db.code().as_deref(), Some("40P01") | Some("40001")) =>
            {
                ReservationError::TransactionConflict(e.to_string())
            }
            other => ReservationError::Storage(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for ReservationError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error()
            || e.is_connection_dropped()
            || e.is_connection_refusal()
            || e.is_timeout()
            || e.is_unrecoverable_error()
        {
            ReservationError::redis_unavailable(e.to_string())
        } else {
            ReservationError::Storage(format!("hold store: {e}"))
        }
    }
}

impl From<validator::ValidationErrors> for ReservationError {
    fn from(e: validator::ValidationErrors) -> Self {
        ReservationError::InvalidInput(e.to_string())
    }
}

//! Seat holds: time-boxed, exclusive claims on a set of seats.
//!
//! A hold is written for its whole seat set in one atomic step of the
//! [`HoldStore`] or not at all. When the store is down holding fails
//! outright; there is no unlocked fallback.

use chrono::Utc;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use validator::{Validate, ValidationError};

use crate::config::HoldConfig;
use crate::error::{ReservationError, Result};
use crate::holds::{AcquireOutcome, HoldStore};
use crate::models::{
    EventId, HoldDetails, HoldId, HoldInvalidReason, HoldRecord, HoldValidation, SeatId,
    SeatLockOwner, UserId,
};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct HoldRequest {
    #[validate(range(min = 1))]
    pub user_id: UserId,
    #[validate(range(min = 1))]
    pub event_id: EventId,
    #[validate(length(min = 1, max = 10), custom(function = "validate_seat_ids"))]
    pub seat_ids: Vec<SeatId>,
    /// Falls back to the configured default when absent.
    pub ttl_secs: Option<u64>,
}

fn validate_seat_ids(seat_ids: &[SeatId]) -> std::result::Result<(), ValidationError> {
    if seat_ids.iter().any(|id| *id <= 0) {
        return Err(ValidationError::new("seat_id_not_positive"));
    }
    let mut seen = HashSet::with_capacity(seat_ids.len());
    if !seat_ids.iter().all(|id| seen.insert(*id)) {
        return Err(ValidationError::new("duplicate_seat_id"));
    }
    Ok(())
}

pub struct SeatLockManager {
    store: Arc<dyn HoldStore>,
    config: HoldConfig,
}

impl SeatLockManager {
    pub fn new(store: Arc<dyn HoldStore>, config: HoldConfig) -> Self {
        Self { store, config }
    }

    /// Checks the request shape and resolves its TTL.
    pub fn validate_request(&self, request: &HoldRequest) -> Result<Duration> {
        request.validate()?;

        if request.seat_ids.len() > self.config.max_seats {
            return Err(ReservationError::InvalidInput(format!(
                "at most {} seats per hold, got {}",
                self.config.max_seats,
                request.seat_ids.len()
            )));
        }

        match request.ttl_secs {
            None => Ok(self.config.default_ttl()),
            Some(0) => Err(ReservationError::InvalidInput(
                "hold ttl must be positive".into(),
            )),
            Some(secs) => {
                let ttl = Duration::from_secs(secs);
                if ttl > self.config.max_ttl() {
                    return Err(ReservationError::InvalidInput(format!(
                        "hold ttl {secs}s exceeds maximum {}s",
                        self.config.max_ttl_secs
                    )));
                }
                Ok(ttl)
            }
        }
    }

    /// Holds every requested seat for the user, or none of them.
    pub async fn hold_seats(&self, request: HoldRequest) -> Result<HoldDetails> {
        let ttl = self.validate_request(&request)?;

        let mut seat_ids = request.seat_ids;
        seat_ids.sort_unstable();

        let record = HoldRecord {
            hold_id: HoldId::new(),
            user_id: request.user_id,
            event_id: request.event_id,
            seat_ids,
            created_at: Utc::now(),
        };

        match self.store.try_acquire(&record, ttl).await? {
            AcquireOutcome::Acquired => {
                info!(
                    hold_id = %record.hold_id,
                    user_id = record.user_id,
                    event_id = record.event_id,
                    seats = ?record.seat_ids,
                    ttl_secs = ttl.as_secs(),
                    "Seats held"
                );
                let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
                Ok(HoldDetails::from_record(record, ttl_ms))
            }
            AcquireOutcome::Contended { seat_id } => {
                debug!(
                    user_id = record.user_id,
                    event_id = record.event_id,
                    seat_id,
                    "Hold rejected, seat already locked"
                );
                Err(ReservationError::SeatAlreadyHeld { seat_id })
            }
        }
    }

    /// Releasing a hold that is already gone is an error, not a no-op.
    pub async fn release_hold(&self, hold_id: HoldId) -> Result<usize> {
        match self.store.release(hold_id).await? {
            Some(released) => {
                info!(hold_id = %hold_id, released, "Hold released");
                Ok(released)
            }
            None => {
                warn!(hold_id = %hold_id, "Release of unknown or expired hold");
                Err(ReservationError::HoldNotFound { hold_id })
            }
        }
    }

    /// Read-only; a valid hold is never extended.
    pub async fn validate_hold(&self, hold_id: HoldId, user_id: UserId) -> Result<HoldValidation> {
        let Some(stored) = self.store.fetch(hold_id).await? else {
            return Ok(HoldValidation::invalid(HoldInvalidReason::Missing));
        };
        if stored.record.user_id != user_id {
            return Ok(HoldValidation::invalid(HoldInvalidReason::WrongOwner));
        }
        if stored.ttl_remaining_ms <= 0 {
            return Ok(HoldValidation::invalid(HoldInvalidReason::Expired));
        }
        Ok(HoldValidation::valid(HoldDetails::from_record(
            stored.record,
            stored.ttl_remaining_ms,
        )))
    }

    pub async fn user_holds(&self, user_id: UserId) -> Result<Vec<HoldDetails>> {
        let holds = self.store.holds_for_user(user_id).await?;
        Ok(holds
            .into_iter()
            .map(|h| HoldDetails::from_record(h.record, h.ttl_remaining_ms))
            .collect())
    }

    pub async fn hold_details(&self, hold_id: HoldId) -> Result<HoldDetails> {
        self.store
            .fetch(hold_id)
            .await?
            .map(|h| HoldDetails::from_record(h.record, h.ttl_remaining_ms))
            .ok_or(ReservationError::HoldNotFound { hold_id })
    }

    /// Seats of `seat_ids` that currently carry a live lock, with their owner.
    pub async fn check_seat_holds(
        &self,
        event_id: EventId,
        seat_ids: &[SeatId],
    ) -> Result<BTreeMap<SeatId, SeatLockOwner>> {
        let owners = self.store.seat_owners(event_id, seat_ids).await?;
        Ok(seat_ids
            .iter()
            .copied()
            .zip(owners)
            .filter_map(|(seat_id, owner)| owner.map(|o| (seat_id, o)))
            .collect())
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

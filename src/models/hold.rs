use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{EventId, SeatId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HoldId(pub Uuid);

impl HoldId {
    pub fn new() -> Self {
        HoldId(Uuid::new_v4())
    }
}

impl Default for HoldId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HoldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for HoldId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(HoldId)
    }
}

/// Everything written to the hold store when a hold is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRecord {
    pub hold_id: HoldId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub seat_ids: Vec<SeatId>,
    pub created_at: DateTime<Utc>,
}

impl HoldRecord {
    /// Value stored under every per-seat lock key of this hold.
    pub fn lock_value(&self) -> String {
        SeatLockOwner {
            user_id: self.user_id,
            hold_id: self.hold_id,
        }
        .to_string()
    }

    pub fn seat_csv(&self) -> String {
        self.seat_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A live hold as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoldDetails {
    pub hold_id: HoldId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub seat_ids: Vec<SeatId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Milliseconds left before the store reaps the hold.
    pub ttl_remaining_ms: i64,
}

impl HoldDetails {
    pub fn from_record(record: HoldRecord, ttl_remaining_ms: i64) -> Self {
        Self {
            expires_at: Utc::now() + Duration::milliseconds(ttl_remaining_ms.max(0)),
            hold_id: record.hold_id,
            user_id: record.user_id,
            event_id: record.event_id,
            seat_ids: record.seat_ids,
            created_at: record.created_at,
            ttl_remaining_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldInvalidReason {
    /// Never existed, released, or already reaped by TTL.
    Missing,
    WrongOwner,
    Expired,
}

impl fmt::Display for HoldInvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HoldInvalidReason::Missing => "hold not found or expired",
            HoldInvalidReason::WrongOwner => "hold belongs to another user",
            HoldInvalidReason::Expired => "hold has expired",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoldValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<HoldInvalidReason>,
    #[serde(skip)]
    pub hold: Option<HoldDetails>,
}

impl HoldValidation {
    pub fn valid(hold: HoldDetails) -> Self {
        Self {
            valid: true,
            reason: None,
            hold: Some(hold),
        }
    }

    pub fn invalid(reason: HoldInvalidReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            hold: None,
        }
    }
}

/// Owner recorded in a per-seat lock key, encoded as `{user_id}:{hold_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeatLockOwner {
    pub user_id: UserId,
    pub hold_id: HoldId,
}

impl fmt::Display for SeatLockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.hold_id)
    }
}

impl FromStr for SeatLockOwner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user, hold) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed seat lock value '{s}'"))?;
        Ok(Self {
            user_id: user.parse().map_err(|_| format!("bad user id in '{s}'"))?,
            hold_id: hold.parse().map_err(|_| format!("bad hold id in '{s}'"))?,
        })
    }
}

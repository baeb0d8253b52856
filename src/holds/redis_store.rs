use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{AcquireOutcome, HoldKeys, HoldStore, StoredHold};
use crate::error::{ReservationError, Result};
use crate::models::{EventId, HoldId, HoldRecord, SeatId, SeatLockOwner, UserId};
use crate::redis_client::RedisClient;

// KEYS[1..n]  seat lock keys
// KEYS[n+1]   hold metadata key
// KEYS[n+2]   user hold index key
// ARGV: lock value, ttl ms, user id, event id, seat csv, created_at ms, hold id
//
// Returns 0 when the hold was written, otherwise the 1-based index of the
// first seat that already had a lock. Nothing is written in that case.
const ACQUIRE_SCRIPT: &str = r#"
local n = #KEYS - 2
for i = 1, n do
    if redis.call('EXISTS', KEYS[i]) == 1 then
        return i
    end
end

local ttl = tonumber(ARGV[2])
for i = 1, n do
    redis.call('SET', KEYS[i], ARGV[1], 'PX', ttl)
end

local hold_key = KEYS[n + 1]
redis.call('HSET', hold_key,
    'user_id', ARGV[3],
    'event_id', ARGV[4],
    'seat_ids', ARGV[5],
    'seat_count', n,
    'created_at', ARGV[6])
redis.call('PEXPIRE', hold_key, ttl)

local index_key = KEYS[n + 2]
redis.call('SADD', index_key, ARGV[7])
if redis.call('PTTL', index_key) < ttl then
    redis.call('PEXPIRE', index_key, ttl)
end
return 0
"#;

// KEYS[1] hold metadata key
// ARGV: key prefix, hold id
//
// Returns -1 if the hold does not exist, otherwise the number of seat
// locks removed. A seat lock is only removed while it still carries this
// hold's value, so a later hold on the same seat is never touched.
const RELEASE_SCRIPT: &str = r#"
local hold_key = KEYS[1]
local meta = redis.call('HMGET', hold_key, 'user_id', 'event_id', 'seat_ids')
if not meta[1] then
    return -1
end

local prefix = ARGV[1]
local lock_value = meta[1] .. ':' .. ARGV[2]
local released = 0
for seat in string.gmatch(meta[3], '[^,]+') do
    local lock_key = prefix .. 'seat_lock:' .. meta[2] .. ':' .. seat
    if redis.call('GET', lock_key) == lock_value then
        redis.call('DEL', lock_key)
        released = released + 1
    end
end

redis.call('SREM', prefix .. 'user_holds:' .. meta[1], ARGV[2])
redis.call('DEL', hold_key)
return released
"#;

/// Redis-backed hold store. Acquire and release run as server-side
/// scripts, so each is a single atomic step for every connected process.
#[derive(Clone)]
pub struct RedisHoldStore {
    redis: RedisClient,
    keys: HoldKeys,
    acquire: Script,
    release: Script,
}

impl RedisHoldStore {
    pub fn new(redis: RedisClient, key_prefix: impl Into<String>) -> Self {
        Self {
            redis,
            keys: HoldKeys::new(key_prefix),
            acquire: Script::new(ACQUIRE_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    async fn prune_index(&self, user_id: UserId, stale: &[String]) {
        if stale.is_empty() {
            return;
        }
        let mut conn = self.redis.conn.clone();
        let result: redis::RedisResult<i64> =
            conn.srem(self.keys.user_index(user_id), stale).await;
        if let Err(e) = result {
            warn!(user_id, error = %e, "Failed to prune stale hold index entries");
        }
    }
}

#[async_trait]
impl HoldStore for RedisHoldStore {
    async fn try_acquire(&self, hold: &HoldRecord, ttl: Duration) -> Result<AcquireOutcome> {
        let mut conn = self.redis.conn.clone();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        let mut invocation = self.acquire.prepare_invoke();
        for seat_id in &hold.seat_ids {
            invocation.key(self.keys.seat_lock(hold.event_id, *seat_id));
        }
        invocation
            .key(self.keys.hold(hold.hold_id))
            .key(self.keys.user_index(hold.user_id))
            .arg(hold.lock_value())
            .arg(ttl_ms)
            .arg(hold.user_id)
            .arg(hold.event_id)
            .arg(hold.seat_csv())
            .arg(hold.created_at.timestamp_millis())
            .arg(hold.hold_id.to_string());

        let contended: i64 = invocation.invoke_async(&mut conn).await?;
        if contended == 0 {
            return Ok(AcquireOutcome::Acquired);
        }

        let seat_id = usize::try_from(contended - 1)
            .ok()
            .and_then(|i| hold.seat_ids.get(i).copied())
            .ok_or_else(|| {
                ReservationError::Storage(format!("acquire script returned {contended}"))
            })?;
        Ok(AcquireOutcome::Contended { seat_id })
    }

    async fn release(&self, hold_id: HoldId) -> Result<Option<usize>> {
        let mut conn = self.redis.conn.clone();
        let released: i64 = self
            .release
            .key(self.keys.hold(hold_id))
            .arg(self.keys.prefix())
            .arg(hold_id.to_string())
            .invoke_async(&mut conn)
            .await?;

        Ok(usize::try_from(released).ok())
    }

    async fn fetch(&self, hold_id: HoldId) -> Result<Option<StoredHold>> {
        let mut conn = self.redis.conn.clone();
        let key = self.keys.hold(hold_id);

        let (fields, pttl): (HashMap<String, String>, i64) = redis::pipe()
            .atomic()
            .hgetall(&key)
            .pttl(&key)
            .query_async(&mut conn)
            .await?;

        match record_from_hash(hold_id, &fields)? {
            Some(record) => Ok(Some(StoredHold {
                record,
                ttl_remaining_ms: pttl,
            })),
            None => Ok(None),
        }
    }

    async fn holds_for_user(&self, user_id: UserId) -> Result<Vec<StoredHold>> {
        let mut conn = self.redis.conn.clone();
        let members: Vec<String> = conn.smembers(self.keys.user_index(user_id)).await?;

        let mut live = Vec::with_capacity(members.len());
        let mut stale = Vec::new();
        for member in members {
            let Ok(hold_id) = member.parse::<HoldId>() else {
                stale.push(member);
                continue;
            };
            match self.fetch(hold_id).await? {
                Some(hold) => live.push(hold),
                None => stale.push(member),
            }
        }

        debug!(user_id, live = live.len(), stale = stale.len(), "Loaded user holds");
        self.prune_index(user_id, &stale).await;
        live.sort_by_key(|h| h.record.created_at);
        Ok(live)
    }

    async fn seat_owners(
        &self,
        event_id: EventId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<Option<SeatLockOwner>>> {
        if seat_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.conn.clone();
        let keys: Vec<String> = seat_ids
            .iter()
            .map(|seat_id| self.keys.seat_lock(event_id, *seat_id))
            .collect();

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        values
            .into_iter()
            .map(|value| {
                value
                    .map(|v| v.parse::<SeatLockOwner>().map_err(ReservationError::Storage))
                    .transpose()
            })
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        self.redis.ping().await.map_err(ReservationError::from)
    }
}

/// Decodes the hold metadata hash. An empty hash means the hold is gone.
fn record_from_hash(hold_id: HoldId, fields: &HashMap<String, String>) -> Result<Option<HoldRecord>> {
    if fields.is_empty() {
        return Ok(None);
    }

    let field = |name: &str| {
        fields.get(name).ok_or_else(|| {
            ReservationError::Storage(format!("hold {hold_id} is missing field '{name}'"))
        })
    };
    let malformed =
        |name: &str| ReservationError::Storage(format!("hold {hold_id} has malformed '{name}'"));

    let seat_ids = field("seat_ids")?
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<SeatId>().map_err(|_| malformed("seat_ids")))
        .collect::<Result<Vec<_>>>()?;

    let created_ms: i64 = field("created_at")?
        .parse()
        .map_err(|_| malformed("created_at"))?;
    let created_at = Utc
        .timestamp_millis_opt(created_ms)
        .single()
        .ok_or_else(|| malformed("created_at"))?;

    Ok(Some(HoldRecord {
        hold_id,
        user_id: field("user_id")?.parse().map_err(|_| malformed("user_id"))?,
        event_id: field("event_id")?.parse().map_err(|_| malformed("event_id"))?,
        seat_ids,
        created_at,
    }))
}

//! `RedisHoldStore` scripts against a real Redis.
//!
//! Docker must be running; each test starts its own Redis container
//! through testcontainers.

#![allow(clippy::expect_used)]

use chrono::Utc;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;

use seat_reservation::config::HoldConfig;
use seat_reservation::holds::{AcquireOutcome, HoldKeys, HoldStore, RedisHoldStore};
use seat_reservation::models::{EventId, HoldId, HoldRecord, SeatId, SeatLockOwner, UserId};
use seat_reservation::redis_client::RedisClient;
use seat_reservation::services::{HoldRequest, SeatLockManager};
use seat_reservation::ReservationError;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::Redis;

const PREFIX: &str = "it:";
const EVENT: EventId = 1;

async fn setup() -> (ContainerAsync<Redis>, RedisClient, Arc<RedisHoldStore>) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get redis port");
    let url = format!("redis://127.0.0.1:{port}");

    let mut retries = 0;
    let client = loop {
        if let Ok(client) = RedisClient::new(&url).await {
            if client.ping().await.is_ok() {
                break client;
            }
        }
        assert!(retries < 60, "Redis did not come up after {retries} retries");
        retries += 1;
        tokio::time::sleep(Duration::from_secs(1)).await;
    };

    let store = Arc::new(RedisHoldStore::new(client.clone(), PREFIX));
    (container, client, store)
}

fn record(user_id: UserId, seat_ids: &[SeatId]) -> HoldRecord {
    HoldRecord {
        hold_id: HoldId::new(),
        user_id,
        event_id: EVENT,
        seat_ids: seat_ids.to_vec(),
        created_at: Utc::now(),
    }
}

fn request(user_id: UserId, seat_ids: &[SeatId]) -> HoldRequest {
    HoldRequest {
        user_id,
        event_id: EVENT,
        seat_ids: seat_ids.to_vec(),
        ttl_secs: None,
    }
}

#[tokio::test]
async fn contended_acquire_writes_nothing() {
    let (_container, client, store) = setup().await;
    let keys = HoldKeys::new(PREFIX);
    let mut conn = client.conn.clone();

    let first = record(1, &[1, 2]);
    assert_eq!(
        store.try_acquire(&first, Duration::from_secs(60)).await.unwrap(),
        AcquireOutcome::Acquired
    );

    let second = record(2, &[3, 2, 4]);
    assert_eq!(
        store.try_acquire(&second, Duration::from_secs(60)).await.unwrap(),
        AcquireOutcome::Contended { seat_id: 2 }
    );

    // Neither the free seats, the metadata nor the index saw the loser.
    for seat in [3, 4] {
        let exists: bool = conn.exists(keys.seat_lock(EVENT, seat)).await.unwrap();
        assert!(!exists, "seat {seat} was locked by a failed acquire");
    }
    let meta: bool = conn.exists(keys.hold(second.hold_id)).await.unwrap();
    assert!(!meta);
    assert!(store.holds_for_user(2).await.unwrap().is_empty());

    let owner: Option<String> = conn.get(keys.seat_lock(EVENT, 2)).await.unwrap();
    assert_eq!(owner, Some(first.lock_value()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_holds_have_one_winner() {
    let (_container, _client, store) = setup().await;
    let locks = Arc::new(SeatLockManager::new(store.clone(), HoldConfig::default()));

    let racers = (0..12).map(|i| {
        let locks = locks.clone();
        tokio::spawn(async move { locks.hold_seats(request(100 + i, &[5, 20 + i])).await })
    });
    let results: Vec<_> = futures::future::join_all(racers)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(err, ReservationError::SeatAlreadyHeld { seat_id: 5 }), "{err:?}");
    }

    let winner = results.into_iter().find_map(|r| r.ok()).unwrap();
    let held = locks.check_seat_holds(EVENT, &[5]).await.unwrap();
    assert_eq!(held[&5].hold_id, winner.hold_id);
}

#[tokio::test]
async fn release_leaves_locks_owned_by_someone_else() {
    let (_container, client, store) = setup().await;
    let keys = HoldKeys::new(PREFIX);
    let mut conn = client.conn.clone();

    let hold = record(1, &[4, 5]);
    store.try_acquire(&hold, Duration::from_secs(60)).await.unwrap();

    let intruder = SeatLockOwner {
        user_id: 99,
        hold_id: HoldId::new(),
    };
    let _: () = conn
        .set(keys.seat_lock(EVENT, 5), intruder.to_string())
        .await
        .unwrap();

    assert_eq!(store.release(hold.hold_id).await.unwrap(), Some(1));

    let seat4: Option<String> = conn.get(keys.seat_lock(EVENT, 4)).await.unwrap();
    assert_eq!(seat4, None);
    let seat5: Option<String> = conn.get(keys.seat_lock(EVENT, 5)).await.unwrap();
    assert_eq!(seat5, Some(intruder.to_string()));
    let indexed: Vec<String> = conn.smembers(keys.user_index(1)).await.unwrap();
    assert!(indexed.is_empty());

    // Second release finds nothing.
    assert_eq!(store.release(hold.hold_id).await.unwrap(), None);
}

#[tokio::test]
async fn double_release_through_the_manager_fails() {
    let (_container, _client, store) = setup().await;
    let locks = SeatLockManager::new(store, HoldConfig::default());

    let hold = locks.hold_seats(request(3, &[8, 7])).await.unwrap();
    assert_eq!(hold.seat_ids, vec![7, 8]);
    assert!(locks.validate_hold(hold.hold_id, 3).await.unwrap().valid);
    assert!(hold.ttl_remaining_ms > 0);

    assert_eq!(locks.release_hold(hold.hold_id).await.unwrap(), 2);
    let err = locks.release_hold(hold.hold_id).await.unwrap_err();
    assert!(matches!(err, ReservationError::HoldNotFound { .. }));
    assert!(locks.check_seat_holds(EVENT, &[7, 8]).await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_holds_drop_out_of_the_user_index() {
    let (_container, client, store) = setup().await;
    let keys = HoldKeys::new(PREFIX);
    let mut conn = client.conn.clone();

    let short = record(6, &[1]);
    let long = record(6, &[2]);
    store.try_acquire(&short, Duration::from_millis(200)).await.unwrap();
    store.try_acquire(&long, Duration::from_secs(60)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    let live = store.holds_for_user(6).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].record.hold_id, long.hold_id);
    assert!(live[0].ttl_remaining_ms > 0);

    let indexed: Vec<String> = conn.smembers(keys.user_index(6)).await.unwrap();
    assert_eq!(indexed, vec![long.hold_id.to_string()]);

    // The expired seat is free again.
    let owners = store.seat_owners(EVENT, &[1, 2]).await.unwrap();
    assert_eq!(owners[0], None);
    assert_eq!(owners[1].as_ref().map(|o| o.hold_id), Some(long.hold_id));
    assert!(store.fetch(short.hold_id).await.unwrap().is_none());
}

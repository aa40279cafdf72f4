use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use deadpool_redis::{Config, Pool, Runtime};
use futures::future::join_all;
use redis::AsyncCommands;
use uuid::Uuid;

use appointment_cell::models::{Appointment, AppointmentStatus, QueueStatus, SlotHold, SlotKey, VisitType};
use appointment_cell::services::{RedisSchedulingStore, SchedulingStore, StoreError};

/// Live Redis fixture. Each run works on its own provider and on a far-future
/// day so counters and indexes never collide with other runs.
struct RedisTestUtils {
    pool: Pool,
    store: Arc<RedisSchedulingStore>,
    provider_id: Uuid,
    date: NaiveDate,
}

impl RedisTestUtils {
    /// `None` when `REDIS_TEST_URL` is not set.
    async fn new() -> Option<Self> {
        let Ok(redis_url) = std::env::var("REDIS_TEST_URL") else {
            eprintln!("REDIS_TEST_URL not set, skipping live Redis test");
            return None;
        };

        let pool = Config::from_url(redis_url.clone())
            .create_pool(Some(Runtime::Tokio1))
            .expect("Failed to create test pool");
        let store = RedisSchedulingStore::connect(&redis_url)
            .await
            .expect("Failed to connect scheduling store");

        let provider_id = Uuid::new_v4();
        let offset = (provider_id.as_u128() % 50_000) as i64;
        let date = NaiveDate::from_ymd_opt(2200, 1, 1).unwrap() + Duration::days(offset);

        Some(Self {
            pool,
            store: Arc::new(store),
            provider_id,
            date,
        })
    }

    fn slot(&self, h: u32, m: u32) -> SlotKey {
        SlotKey::new(self.provider_id, self.date, NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    fn confirmed(&self, slot: SlotKey) -> Appointment {
        let mut appointment = Appointment::new_booking(Uuid::new_v4(), &slot, String::new(), Utc::now());
        appointment.status = AppointmentStatus::Confirmed;
        appointment
    }

    fn arrival_of(&self, stored: &Appointment) -> Appointment {
        let mut next = stored.clone();
        next.arrived = true;
        next.arrived_at = Some(Utc::now());
        next.queue_date = Some(self.date);
        next.queue_status = Some(QueueStatus::Waiting);
        next
    }

    /// Remove every key this run touched.
    async fn cleanup(&self) {
        let mut conn = self.pool.get().await.expect("Failed to get connection");
        let day = self.date.format("%Y-%m-%d").to_string();

        let mut keys: Vec<String> = conn
            .keys(format!("*:{}:*", self.provider_id))
            .await
            .expect("Failed to list slot keys");
        let indexed: Vec<String> = conn
            .sunion(vec![
                format!("appointments:date:{}", day),
                format!("appointments:queue:{}", day),
            ])
            .await
            .expect("Failed to read indexes");
        keys.extend(indexed.iter().map(|id| format!("appointment:{}", id)));
        let bookings: Vec<String> = conn
            .keys(format!("patient_bookings:*:{}", day))
            .await
            .expect("Failed to list booking indexes");
        keys.extend(bookings);
        keys.push(format!("appointments:date:{}", day));
        keys.push(format!("appointments:queue:{}", day));
        keys.push(format!("queue_seq:{}", day));

        let _: () = conn.del(keys).await.expect("Failed to clean up");
    }
}

#[tokio::test]
async fn concurrent_holds_on_one_slot_have_one_winner() {
    let Some(utils) = RedisTestUtils::new().await else { return };
    let slot = utils.slot(9, 0);

    let attempts = (0..10).map(|_| {
        let store = utils.store.clone();
        tokio::spawn(async move {
            let hold = SlotHold {
                slot,
                patient_id: Uuid::new_v4(),
                expires_at: Utc::now() + Duration::seconds(60),
            };
            store.try_hold(&hold, Duration::seconds(60)).await
        })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == StoreError::SlotHeld));

    utils.cleanup().await;
}

#[tokio::test]
async fn hold_expires_by_storage_ttl() {
    let Some(utils) = RedisTestUtils::new().await else { return };
    let slot = utils.slot(9, 15);
    let ttl = Duration::milliseconds(300);

    let first = SlotHold {
        slot,
        patient_id: Uuid::new_v4(),
        expires_at: Utc::now() + ttl,
    };
    utils.store.try_hold(&first, ttl).await.unwrap();

    let second = SlotHold {
        patient_id: Uuid::new_v4(),
        ..first.clone()
    };
    assert_matches!(utils.store.try_hold(&second, ttl).await, Err(StoreError::SlotHeld));

    tokio::time::sleep(std::time::Duration::from_millis(450)).await;
    assert!(utils.store.try_hold(&second, ttl).await.is_ok());

    utils.cleanup().await;
}

#[tokio::test]
async fn concurrent_inserts_on_one_slot_have_one_winner() {
    let Some(utils) = RedisTestUtils::new().await else { return };
    let slot = utils.slot(9, 30);

    let attempts = (0..10).map(|_| {
        let store = utils.store.clone();
        let appointment = utils.confirmed(slot);
        let day = utils.date;
        tokio::spawn(async move { store.insert_appointment(&appointment, day).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == StoreError::SlotTaken));

    utils.cleanup().await;
}

#[tokio::test]
async fn stale_version_is_rejected() {
    let Some(utils) = RedisTestUtils::new().await else { return };
    let stored = utils
        .store
        .insert_appointment(&utils.confirmed(utils.slot(10, 0)), utils.date)
        .await
        .unwrap();
    assert_eq!(stored.version, 1);

    let mut first = stored.clone();
    first.visit_type = VisitType::WalkIn;
    let updated = utils.store.update_appointment(&stored, first).await.unwrap();
    assert_eq!(updated.version, 2);

    let mut second = stored.clone();
    second.reason = "late edit".to_string();
    assert_matches!(
        utils.store.update_appointment(&stored, second).await,
        Err(StoreError::VersionConflict)
    );

    let current = utils.store.get_appointment(stored.id).await.unwrap();
    assert_eq!(current.version, 2);
    assert_eq!(current.visit_type, VisitType::WalkIn);

    utils.cleanup().await;
}

#[tokio::test]
async fn concurrent_arrivals_draw_gapless_numbers() {
    let Some(utils) = RedisTestUtils::new().await else { return };

    let mut stored = Vec::new();
    for minute in 0..20 {
        let appointment = utils.confirmed(utils.slot(11, minute));
        stored.push(utils.store.insert_appointment(&appointment, utils.date).await.unwrap());
    }

    let arrivals = stored.iter().map(|previous| {
        let store = utils.store.clone();
        let previous = previous.clone();
        let next = utils.arrival_of(&previous);
        tokio::spawn(async move { store.commit_arrival(&previous, next).await })
    });
    let mut numbers: Vec<u32> = join_all(arrivals)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap().queue_number.unwrap())
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=20).collect::<Vec<u32>>());

    let reread = utils.store.get_appointment(stored[0].id).await.unwrap();
    assert!(reread.queue_number.is_some());
    assert_eq!(reread.version, 2);

    utils.cleanup().await;
}

#[tokio::test]
async fn losing_arrival_race_does_not_burn_a_number() {
    let Some(utils) = RedisTestUtils::new().await else { return };
    let contested = utils
        .store
        .insert_appointment(&utils.confirmed(utils.slot(12, 0)), utils.date)
        .await
        .unwrap();

    let racers = (0..2).map(|_| {
        let store = utils.store.clone();
        let previous = contested.clone();
        let next = utils.arrival_of(&previous);
        tokio::spawn(async move { store.commit_arrival(&previous, next).await })
    });
    let results: Vec<_> = join_all(racers).await.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(StoreError::VersionConflict))));

    let other = utils
        .store
        .insert_appointment(&utils.confirmed(utils.slot(12, 15)), utils.date)
        .await
        .unwrap();
    let arrived = utils
        .store
        .commit_arrival(&other, utils.arrival_of(&other))
        .await
        .unwrap();
    assert_eq!(arrived.queue_number, Some(2));

    utils.cleanup().await;
}

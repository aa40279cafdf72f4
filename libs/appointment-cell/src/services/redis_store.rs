use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Appointment, SlotHold, SlotKey};
use crate::services::store::{SchedulingStore, SlotMove, StoreError};

const HOLD_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then return 'taken' end
local holder = redis.call('GET', KEYS[2])
if holder and holder ~= ARGV[1] then return 'held' end
redis.call('SET', KEYS[2], ARGV[1], 'PX', ARGV[2])
return 'ok'
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('DEL', KEYS[1])
end
return 'ok'
"#;

const INSERT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then return 'taken' end
local holder = redis.call('GET', KEYS[2])
if holder and holder ~= ARGV[2] then return 'held' end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('HSET', KEYS[3], 'data', ARGV[3], 'version', 1)
redis.call('SADD', KEYS[4], ARGV[1])
redis.call('SADD', KEYS[5], ARGV[1])
if holder then redis.call('DEL', KEYS[2]) end
return 'ok'
"#;

// KEYS: appointment, old slot, new slot, new date index, queue index, counter, old date index
// ARGV: expected version, data, id, release old, claim new, index queue, draw number
const UPDATE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if not current then return 'missing' end
if current ~= ARGV[1] then return 'stale' end
if ARGV[5] == '1' then
  local owner = redis.call('GET', KEYS[3])
  if owner and owner ~= ARGV[3] then return 'taken' end
end
if ARGV[4] == '1' and redis.call('GET', KEYS[2]) == ARGV[3] then
  redis.call('DEL', KEYS[2])
end
if ARGV[5] == '1' then redis.call('SET', KEYS[3], ARGV[3]) end
redis.call('HSET', KEYS[1], 'data', ARGV[2], 'version', tonumber(ARGV[1]) + 1)
redis.call('SREM', KEYS[7], ARGV[3])
redis.call('SADD', KEYS[4], ARGV[3])
if ARGV[6] == '1' then redis.call('SADD', KEYS[5], ARGV[3]) end
if ARGV[7] == '1' then
  local n = redis.call('INCR', KEYS[6])
  redis.call('HSET', KEYS[1], 'queue_number', n)
  return 'ok:' .. n
end
return 'ok'
"#;

fn appointment_key(id: Uuid) -> String {
    format!("appointment:{}", id)
}

fn slot_key(slot: &SlotKey) -> String {
    format!("slot:{}", slot.storage_suffix())
}

fn hold_key(slot: &SlotKey) -> String {
    format!("hold:{}", slot.storage_suffix())
}

fn counter_key(date: NaiveDate) -> String {
    format!("queue_seq:{}", date.format("%Y-%m-%d"))
}

fn date_index_key(date: NaiveDate) -> String {
    format!("appointments:date:{}", date.format("%Y-%m-%d"))
}

fn queue_index_key(date: NaiveDate) -> String {
    format!("appointments:queue:{}", date.format("%Y-%m-%d"))
}

fn created_index_key(patient_id: Uuid, day: NaiveDate) -> String {
    format!("patient_bookings:{}:{}", patient_id, day.format("%Y-%m-%d"))
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Shared store for multi-instance deployments. Conditional writes run as Lua
/// scripts so each check-and-write is a single atomic step on the server.
pub struct RedisSchedulingStore {
    pool: Pool,
    hold_script: Script,
    release_script: Script,
    insert_script: Script,
    update_script: Script,
}

impl RedisSchedulingStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis pool: {}", e)))?;

        let store = Self {
            pool,
            hold_script: Script::new(HOLD_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
            insert_script: Script::new(INSERT_SCRIPT),
            update_script: Script::new(UPDATE_SCRIPT),
        };

        let mut conn = store.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis scheduling store initialized");

        Ok(store)
    }

    async fn connection(&self) -> Result<Connection, StoreError> {
        self.pool.get().await.map_err(|e| {
            warn!("Redis connection checkout failed: {}", e);
            StoreError::Unavailable(format!("Redis connection error: {}", e))
        })
    }

    async fn load_many(
        &self,
        conn: &mut Connection,
        ids: Vec<String>,
    ) -> Result<Vec<Appointment>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(format!("appointment:{}", id));
        }
        let rows: Vec<HashMap<String, String>> = pipe.query_async(conn).await?;

        let mut appointments = Vec::with_capacity(rows.len());
        for (id, row) in ids.iter().zip(rows) {
            if row.is_empty() {
                warn!("Index references missing appointment {}", id);
                continue;
            }
            appointments.push(decode(row)?);
        }
        appointments.sort_by_key(|a| a.created_at);
        Ok(appointments)
    }

    async fn write(
        &self,
        previous: &Appointment,
        mut next: Appointment,
        draw_number: bool,
    ) -> Result<Appointment, StoreError> {
        let mut conn = self.connection().await?;

        let slot_move = SlotMove::between(previous, &next);
        next.version = previous.version + 1;
        let data = serde_json::to_string(&next).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let queue_date = next.queue_date.unwrap_or(next.date);
        if draw_number && next.queue_date.is_none() {
            return Err(StoreError::Corrupt("arrival without queue date".to_string()));
        }

        let outcome: String = self
            .update_script
            .key(appointment_key(next.id))
            .key(slot_key(&previous.slot_key()))
            .key(slot_key(&next.slot_key()))
            .key(date_index_key(next.date))
            .key(queue_index_key(queue_date))
            .key(counter_key(queue_date))
            .key(date_index_key(previous.date))
            .arg(previous.version)
            .arg(data)
            .arg(next.id.to_string())
            .arg(flag(slot_move.release_previous))
            .arg(flag(slot_move.claim_next))
            .arg(flag(next.queue_date.is_some()))
            .arg(flag(draw_number))
            .invoke_async(&mut conn)
            .await?;

        match outcome.as_str() {
            "ok" => Ok(next),
            "stale" => Err(StoreError::VersionConflict),
            "missing" => Err(StoreError::NotFound),
            "taken" => Err(StoreError::SlotTaken),
            other => match other.strip_prefix("ok:").map(str::parse::<u32>) {
                Some(Ok(number)) => {
                    debug!("Stamped queue number {} on {} for {}", number, next.id, queue_date);
                    next.queue_number = Some(number);
                    Ok(next)
                }
                _ => Err(StoreError::Corrupt(format!("unexpected script reply: {}", other))),
            },
        }
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn decode(row: HashMap<String, String>) -> Result<Appointment, StoreError> {
    let data = row
        .get("data")
        .ok_or_else(|| StoreError::Corrupt("appointment hash without data".to_string()))?;
    let mut appointment: Appointment =
        serde_json::from_str(data).map_err(|e| StoreError::Corrupt(e.to_string()))?;

    if let Some(version) = row.get("version") {
        appointment.version = version
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("bad version: {}", version)))?;
    }
    // The counter stamps this field inside the arrival script, after `data` was encoded.
    if let Some(number) = row.get("queue_number") {
        appointment.queue_number = Some(
            number
                .parse()
                .map_err(|_| StoreError::Corrupt(format!("bad queue number: {}", number)))?,
        );
    }
    Ok(appointment)
}

#[async_trait]
impl SchedulingStore for RedisSchedulingStore {
    async fn try_hold(&self, hold: &SlotHold, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;

        let outcome: String = self
            .hold_script
            .key(slot_key(&hold.slot))
            .key(hold_key(&hold.slot))
            .arg(hold.patient_id.to_string())
            .arg(ttl.num_milliseconds().max(1))
            .invoke_async(&mut conn)
            .await?;

        match outcome.as_str() {
            "ok" => Ok(()),
            "held" => Err(StoreError::SlotHeld),
            "taken" => Err(StoreError::SlotTaken),
            other => Err(StoreError::Corrupt(format!("unexpected script reply: {}", other))),
        }
    }

    async fn release_hold(&self, slot: &SlotKey, patient_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: String = self
            .release_script
            .key(hold_key(slot))
            .arg(patient_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn insert_appointment(
        &self,
        appointment: &Appointment,
        created_day: NaiveDate,
    ) -> Result<Appointment, StoreError> {
        let mut conn = self.connection().await?;

        let mut stored = appointment.clone();
        stored.version = 1;
        let data = serde_json::to_string(&stored).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let slot = stored.slot_key();

        let outcome: String = self
            .insert_script
            .key(slot_key(&slot))
            .key(hold_key(&slot))
            .key(appointment_key(stored.id))
            .key(date_index_key(stored.date))
            .key(created_index_key(stored.patient_id, created_day))
            .arg(stored.id.to_string())
            .arg(stored.patient_id.to_string())
            .arg(data)
            .invoke_async(&mut conn)
            .await?;

        match outcome.as_str() {
            "ok" => {
                debug!("Stored appointment {} for slot {}", stored.id, slot);
                Ok(stored)
            }
            "taken" => Err(StoreError::SlotTaken),
            "held" => Err(StoreError::SlotHeld),
            other => Err(StoreError::Corrupt(format!("unexpected script reply: {}", other))),
        }
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Appointment, StoreError> {
        let mut conn = self.connection().await?;
        let row: HashMap<String, String> = conn.hgetall(appointment_key(id)).await?;
        if row.is_empty() {
            return Err(StoreError::NotFound);
        }
        decode(row)
    }

    async fn update_appointment(
        &self,
        previous: &Appointment,
        next: Appointment,
    ) -> Result<Appointment, StoreError> {
        self.write(previous, next, false).await
    }

    async fn commit_arrival(
        &self,
        previous: &Appointment,
        next: Appointment,
    ) -> Result<Appointment, StoreError> {
        self.write(previous, next, true).await
    }

    async fn next_queue_number(&self, date: NaiveDate) -> Result<u32, StoreError> {
        let mut conn = self.connection().await?;
        let value: u32 = conn.incr(counter_key(date), 1).await?;
        Ok(value)
    }

    async fn appointments_for_day(&self, date: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn
            .sunion(vec![date_index_key(date), queue_index_key(date)])
            .await?;
        self.load_many(&mut conn, ids).await
    }

    async fn bookings_created_on(
        &self,
        patient_id: Uuid,
        day: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn.smembers(created_index_key(patient_id, day)).await?;
        self.load_many(&mut conn, ids).await
    }
}

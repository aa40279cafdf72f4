use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, SlotHold, SlotKey};
use crate::services::clock::Clock;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("slot has a live hold by another patient")]
    SlotHeld,

    #[error("slot is already booked")]
    SlotTaken,

    #[error("stored version changed since read")]
    VersionConflict,

    #[error("record not found")]
    NotFound,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("stored record is unreadable: {0}")]
    Corrupt(String),
}

impl From<StoreError> for AppointmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SlotHeld => AppointmentError::SlotUnavailable,
            StoreError::SlotTaken => AppointmentError::SlotTaken,
            StoreError::VersionConflict => AppointmentError::ConcurrentModification,
            StoreError::NotFound => AppointmentError::NotFound,
            StoreError::Unavailable(reason) | StoreError::Corrupt(reason) => {
                AppointmentError::Unavailable(reason)
            }
        }
    }
}

/// Persistence for slots, holds, appointments and the daily counters.
///
/// Implementations own the two atomic primitives of the scheduling core: the
/// conditional slot claim and the per-day counter increment. Every appointment
/// write is a compare-and-set on `Appointment::version`.
#[async_trait]
pub trait SchedulingStore: Send + Sync {
    /// Claim or refresh a hold. Fails with `SlotHeld` if another patient holds it
    /// and `SlotTaken` if the slot is booked.
    async fn try_hold(&self, hold: &SlotHold, ttl: Duration) -> Result<(), StoreError>;

    /// Drop the hold if `patient_id` owns it.
    async fn release_hold(&self, slot: &SlotKey, patient_id: Uuid) -> Result<(), StoreError>;

    /// Insert a new appointment claiming its slot. Returns the stored record at version 1.
    async fn insert_appointment(
        &self,
        appointment: &Appointment,
        created_day: NaiveDate,
    ) -> Result<Appointment, StoreError>;

    async fn get_appointment(&self, id: Uuid) -> Result<Appointment, StoreError>;

    /// Replace `previous` with `next` if the stored version still matches.
    /// Moves or releases the slot claim when the slot or status changed.
    async fn update_appointment(
        &self,
        previous: &Appointment,
        next: Appointment,
    ) -> Result<Appointment, StoreError>;

    /// Like `update_appointment`, but also draws the next number for
    /// `next.queue_date` and stamps it in the same atomic step.
    async fn commit_arrival(
        &self,
        previous: &Appointment,
        next: Appointment,
    ) -> Result<Appointment, StoreError>;

    async fn next_queue_number(&self, date: NaiveDate) -> Result<u32, StoreError>;

    /// Appointments scheduled on `date` or queued on `date`.
    async fn appointments_for_day(&self, date: NaiveDate) -> Result<Vec<Appointment>, StoreError>;

    /// Appointments a patient created on a clinic-local day.
    async fn bookings_created_on(
        &self,
        patient_id: Uuid,
        day: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError>;
}

/// Slot claim changes implied by replacing `previous` with `next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotMove {
    pub release_previous: bool,
    pub claim_next: bool,
}

impl SlotMove {
    pub fn between(previous: &Appointment, next: &Appointment) -> Self {
        let same_slot = previous.slot_key() == next.slot_key();
        let had = previous.holds_slot();
        let has = next.holds_slot();
        Self {
            release_previous: had && (!has || !same_slot),
            claim_next: has && (!had || !same_slot),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    appointments: HashMap<Uuid, Appointment>,
    slots: HashMap<SlotKey, Uuid>,
    holds: HashMap<SlotKey, SlotHold>,
    counters: HashMap<NaiveDate, u32>,
    created: HashMap<(Uuid, NaiveDate), Vec<Uuid>>,
}

impl MemoryState {
    fn live_hold_by_other(&self, slot: &SlotKey, patient_id: Uuid, clock: &dyn Clock) -> bool {
        self.holds
            .get(slot)
            .map(|hold| hold.patient_id != patient_id && hold.is_live(clock.now()))
            .unwrap_or(false)
    }

    fn purge_expired_holds(&mut self, clock: &dyn Clock) {
        let now = clock.now();
        let before = self.holds.len();
        self.holds.retain(|_, hold| hold.is_live(now));
        let purged = before - self.holds.len();
        if purged > 0 {
            debug!("Purged {} expired slot holds", purged);
        }
    }

    fn apply_update(
        &mut self,
        previous: &Appointment,
        mut next: Appointment,
        assign_number: bool,
    ) -> Result<Appointment, StoreError> {
        let (slot_move, old_slot) = {
            let stored = self.appointments.get(&previous.id).ok_or(StoreError::NotFound)?;
            if stored.version != previous.version {
                return Err(StoreError::VersionConflict);
            }
            (SlotMove::between(stored, &next), stored.slot_key())
        };

        let target = next.slot_key();
        if slot_move.claim_next {
            if let Some(owner) = self.slots.get(&target) {
                if *owner != next.id {
                    return Err(StoreError::SlotTaken);
                }
            }
        }

        if assign_number {
            let date = next
                .queue_date
                .ok_or_else(|| StoreError::Corrupt("arrival without queue date".to_string()))?;
            let counter = self.counters.entry(date).or_insert(0);
            *counter += 1;
            next.queue_number = Some(*counter);
        }

        if slot_move.release_previous && self.slots.get(&old_slot) == Some(&previous.id) {
            self.slots.remove(&old_slot);
        }
        if slot_move.claim_next {
            self.slots.insert(target, next.id);
        }

        next.version = previous.version + 1;
        self.appointments.insert(next.id, next.clone());
        Ok(next)
    }
}

/// Process-local store. A single mutex serializes every operation, which makes
/// each call trivially atomic.
pub struct InMemorySchedulingStore {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl InMemorySchedulingStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock,
        }
    }
}

#[async_trait]
impl SchedulingStore for InMemorySchedulingStore {
    async fn try_hold(&self, hold: &SlotHold, _ttl: Duration) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.purge_expired_holds(self.clock.as_ref());

        if state.slots.contains_key(&hold.slot) {
            return Err(StoreError::SlotTaken);
        }
        if state.live_hold_by_other(&hold.slot, hold.patient_id, self.clock.as_ref()) {
            return Err(StoreError::SlotHeld);
        }

        state.holds.insert(hold.slot, hold.clone());
        Ok(())
    }

    async fn release_hold(&self, slot: &SlotKey, patient_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.holds.get(slot).map(|h| h.patient_id) == Some(patient_id) {
            state.holds.remove(slot);
        }
        Ok(())
    }

    async fn insert_appointment(
        &self,
        appointment: &Appointment,
        created_day: NaiveDate,
    ) -> Result<Appointment, StoreError> {
        let mut state = self.state.lock().await;
        state.purge_expired_holds(self.clock.as_ref());
        let slot = appointment.slot_key();

        if state.slots.contains_key(&slot) {
            return Err(StoreError::SlotTaken);
        }
        if state.live_hold_by_other(&slot, appointment.patient_id, self.clock.as_ref()) {
            return Err(StoreError::SlotHeld);
        }

        let mut stored = appointment.clone();
        stored.version = 1;

        state.slots.insert(slot, stored.id);
        state.holds.remove(&slot);
        state
            .created
            .entry((stored.patient_id, created_day))
            .or_default()
            .push(stored.id);
        state.appointments.insert(stored.id, stored.clone());

        debug!("Stored appointment {} for slot {}", stored.id, slot);
        Ok(stored)
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Appointment, StoreError> {
        let state = self.state.lock().await;
        state.appointments.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn update_appointment(
        &self,
        previous: &Appointment,
        next: Appointment,
    ) -> Result<Appointment, StoreError> {
        self.state.lock().await.apply_update(previous, next, false)
    }

    async fn commit_arrival(
        &self,
        previous: &Appointment,
        next: Appointment,
    ) -> Result<Appointment, StoreError> {
        self.state.lock().await.apply_update(previous, next, true)
    }

    async fn next_queue_number(&self, date: NaiveDate) -> Result<u32, StoreError> {
        let mut state = self.state.lock().await;
        let counter = state.counters.entry(date).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn appointments_for_day(&self, date: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        let state = self.state.lock().await;
        let mut day: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| a.date == date || a.queue_date == Some(date))
            .cloned()
            .collect();
        day.sort_by_key(|a| a.created_at);
        Ok(day)
    }

    async fn bookings_created_on(
        &self,
        patient_id: Uuid,
        day: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .created
            .get(&(patient_id, day))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.appointments.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}

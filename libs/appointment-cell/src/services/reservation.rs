use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, SlotHold, SlotKey};
use crate::services::clock::{ClinicCalendar, Clock};
use crate::services::store::{SchedulingStore, StoreError};

const MAX_REASON_LENGTH: usize = 500;

/// Exclusive claims on (provider, date, time): short-lived holds while a
/// patient is filling in the form, then the booking itself.
pub struct SlotReservationService {
    store: Arc<dyn SchedulingStore>,
    clock: Arc<dyn Clock>,
    calendar: ClinicCalendar,
    config: Arc<AppConfig>,
}

impl SlotReservationService {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        clock: Arc<dyn Clock>,
        calendar: ClinicCalendar,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            clock,
            calendar,
            config,
        }
    }

    pub async fn try_hold(
        &self,
        slot: SlotKey,
        patient_id: Uuid,
        ttl_seconds: Option<i64>,
    ) -> Result<SlotHold, AppointmentError> {
        self.ensure_not_past(slot.date, slot.time)?;

        let ttl = Duration::seconds(self.config.clamp_hold_ttl(ttl_seconds));
        let hold = SlotHold {
            slot,
            patient_id,
            expires_at: self.clock.now() + ttl,
        };

        match self.store.try_hold(&hold, ttl).await {
            Ok(()) => {
                debug!("Slot {} held by {} until {}", slot, patient_id, hold.expires_at);
                Ok(hold)
            }
            Err(StoreError::SlotHeld) | Err(StoreError::SlotTaken) => {
                debug!("Slot {} unavailable for {}", slot, patient_id);
                Err(AppointmentError::SlotUnavailable)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn release(&self, slot: SlotKey, patient_id: Uuid) -> Result<(), AppointmentError> {
        self.store.release_hold(&slot, patient_id).await?;
        debug!("Released hold on {} for {}", slot, patient_id);
        Ok(())
    }

    pub async fn book(
        &self,
        patient_id: Uuid,
        slot: SlotKey,
        reason: String,
    ) -> Result<Appointment, AppointmentError> {
        let reason = reason.trim().to_string();
        if reason.chars().count() > MAX_REASON_LENGTH {
            return Err(AppointmentError::ValidationError(format!(
                "reason must be at most {} characters",
                MAX_REASON_LENGTH
            )));
        }
        self.ensure_not_past(slot.date, slot.time)?;

        let now = self.clock.now();
        let today = self.calendar.day_of(now);
        self.check_daily_quota(patient_id, today).await?;

        let appointment = Appointment::new_booking(patient_id, &slot, reason, now);
        match self.store.insert_appointment(&appointment, today).await {
            Ok(stored) => {
                info!("Booked appointment {} for patient {} at {}", stored.id, patient_id, slot);
                Ok(stored)
            }
            Err(StoreError::SlotTaken) | Err(StoreError::SlotHeld) => {
                debug!("Booking race lost on {} by patient {}", slot, patient_id);
                Err(AppointmentError::SlotTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Soft limit; a few concurrent requests may slip past it.
    async fn check_daily_quota(&self, patient_id: Uuid, today: NaiveDate) -> Result<(), AppointmentError> {
        let limit = self.config.daily_booking_limit;
        let active = self
            .store
            .bookings_created_on(patient_id, today)
            .await?
            .iter()
            .filter(|a| a.status != AppointmentStatus::Cancelled)
            .count();

        if active >= limit {
            warn!("Patient {} reached the daily booking limit ({})", patient_id, limit);
            return Err(AppointmentError::DailyLimitExceeded { limit });
        }
        Ok(())
    }

    fn ensure_not_past(&self, date: NaiveDate, time: NaiveTime) -> Result<(), AppointmentError> {
        if self.calendar.scheduled_at(date, time) < self.clock.now() {
            return Err(AppointmentError::ValidationError(
                "cannot reserve a slot in the past".to_string(),
            ));
        }
        Ok(())
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use appointment_cell::models::{Appointment, AppointmentError, QueueStatus};
use appointment_cell::services::{Clock, EventKind, StoreError};
use appointment_cell::AppState;

use crate::error::QueueError;
use crate::models::{CallNextOutcome, PositionResponse, QueueSnapshot, UpdatePriorityRequest};
use crate::services::grace::convert_late_bookings;
use crate::services::scheduler::PriorityScheduler;

/// Today's queue as seen by staff and patients. Every read first applies the
/// grace-period conversion so late bookings are ranked as walk-ins.
pub struct QueueService {
    state: Arc<AppState>,
    scheduler: PriorityScheduler,
    grace: Duration,
    max_call_attempts: u32,
}

struct TodayView {
    date: NaiveDate,
    now: DateTime<Utc>,
    appointments: Vec<Appointment>,
    converted: Vec<Uuid>,
}

impl QueueService {
    pub fn new(state: Arc<AppState>) -> Self {
        let scheduler = PriorityScheduler::new(state.calendar(), state.config.average_minutes_per_patient);
        let grace = Duration::minutes(state.config.grace_period_minutes);
        Self {
            state,
            scheduler,
            grace,
            max_call_attempts: 3,
        }
    }

    pub async fn today(&self, provider_id: Option<Uuid>) -> Result<QueueSnapshot, QueueError> {
        let view = self.load_today(provider_id).await?;

        let date = view.date;
        let in_queue = |status: QueueStatus| {
            move |a: &&Appointment| a.queue_date == Some(date) && a.queue_status == Some(status)
        };

        let waiting: Vec<Appointment> = view
            .appointments
            .iter()
            .filter(in_queue(QueueStatus::Waiting))
            .cloned()
            .collect();
        let in_service = view
            .appointments
            .iter()
            .filter(|a| {
                a.queue_date == Some(view.date)
                    && matches!(a.queue_status, Some(QueueStatus::Called) | Some(QueueStatus::InProgress))
            })
            .cloned()
            .collect();
        let skipped = view
            .appointments
            .iter()
            .filter(in_queue(QueueStatus::Skipped))
            .cloned()
            .collect();
        let served = view
            .appointments
            .iter()
            .filter(in_queue(QueueStatus::Served))
            .cloned()
            .collect();

        Ok(QueueSnapshot {
            date: view.date,
            provider_id,
            waiting: self.scheduler.rank(waiting, view.now),
            in_service,
            skipped,
            served,
            converted: view.converted,
        })
    }

    /// Move the highest-ranked waiting patient to `called`. A lost race on the
    /// chosen entry re-reads the queue and picks again.
    pub async fn call_next(&self, provider_id: Option<Uuid>) -> Result<CallNextOutcome, QueueError> {
        let lifecycle = self.state.lifecycle();

        for attempt in 1..=self.max_call_attempts {
            let snapshot = self.today(provider_id).await?;
            let Some(next) = snapshot.waiting.into_iter().next() else {
                debug!("No waiting patients for provider {:?}", provider_id);
                return Ok(CallNextOutcome::Empty);
            };

            match lifecycle.call(&next.appointment).await {
                Ok(called) => return Ok(CallNextOutcome::Called(called)),
                Err(AppointmentError::ConcurrentModification) => {
                    warn!(
                        "Appointment {} changed while being called, retrying attempt {}/{}",
                        next.appointment.id, attempt, self.max_call_attempts
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppointmentError::ConcurrentModification.into())
    }

    /// The patient's current place in their provider's queue today.
    pub async fn position(&self, patient_id: Uuid) -> Result<PositionResponse, QueueError> {
        let view = self.load_today(None).await?;

        let mine = view
            .appointments
            .iter()
            .filter(|a| a.patient_id == patient_id && a.queue_date == Some(view.date) && !a.is_terminal())
            .min_by_key(|a| (!a.is_waiting(), a.queue_number))
            .ok_or(QueueError::NotInQueue)?;

        let provider_waiting: Vec<Appointment> = view
            .appointments
            .iter()
            .filter(|a| a.provider_id == mine.provider_id && a.queue_date == Some(view.date) && a.is_waiting())
            .cloned()
            .collect();
        let ranked = self.scheduler.rank(provider_waiting, view.now);
        let entry = ranked.iter().find(|e| e.appointment.id == mine.id);

        Ok(PositionResponse {
            appointment_id: mine.id,
            queue_number: mine.queue_number,
            queue_status: mine.queue_status,
            rank: entry.map(|e| e.rank),
            ahead: entry.map(|e| e.rank).unwrap_or(0),
            estimated_start: entry.map(|e| e.estimated_start),
        })
    }

    pub async fn set_status(&self, appointment_id: Uuid, status: QueueStatus) -> Result<Appointment, QueueError> {
        Ok(self.state.lifecycle().set_queue_status(appointment_id, status).await?)
    }

    pub async fn set_priority(
        &self,
        appointment_id: Uuid,
        request: UpdatePriorityRequest,
    ) -> Result<Appointment, QueueError> {
        if request.priority_tier.is_none() && request.visit_type.is_none() {
            return Err(QueueError::ValidationError(
                "priority_tier or visit_type is required".to_string(),
            ));
        }

        Ok(self
            .state
            .lifecycle()
            .set_priority(appointment_id, request.priority_tier, request.visit_type)
            .await?)
    }

    async fn load_today(&self, provider_id: Option<Uuid>) -> Result<TodayView, QueueError> {
        let now = self.state.clock.now();
        let calendar = self.state.calendar();
        let date = calendar.day_of(now);

        let stored = self
            .state
            .store
            .appointments_for_day(date)
            .await
            .map_err(AppointmentError::from)?;

        let originals: HashMap<Uuid, Appointment> = stored.iter().map(|a| (a.id, a.clone())).collect();
        let conversion = convert_late_bookings(now, self.grace, &calendar, stored);

        let mut appointments = Vec::with_capacity(conversion.appointments.len());
        for appointment in conversion.appointments {
            let persisted = match originals.get(&appointment.id) {
                Some(original) if conversion.converted.contains(&appointment.id) => {
                    self.persist_conversion(original, appointment, now).await
                }
                _ => appointment,
            };
            appointments.push(persisted);
        }

        if let Some(provider_id) = provider_id {
            appointments.retain(|a| a.provider_id == provider_id);
        }

        Ok(TodayView {
            date,
            now,
            appointments,
            converted: conversion.converted,
        })
    }

    /// Best effort: a concurrent writer wins and the next read converts again.
    async fn persist_conversion(
        &self,
        original: &Appointment,
        converted: Appointment,
        now: DateTime<Utc>,
    ) -> Appointment {
        match self.state.store.update_appointment(original, converted.clone()).await {
            Ok(stored) => {
                info!("Appointment {} passed its grace period, now a walk-in", stored.id);
                self.state.fanout.emit(EventKind::QueueUpdated, &stored, now);
                stored
            }
            Err(StoreError::VersionConflict) => {
                debug!("Skipped grace conversion of {}: modified concurrently", original.id);
                converted
            }
            Err(e) => {
                warn!("Failed to persist grace conversion of {}: {}", original.id, e);
                converted
            }
        }
    }
}

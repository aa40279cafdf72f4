// libs/appointment-cell/src/services/lifecycle.rs
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, ConfirmArrivalRequest, PriorityTier,
    QueueStatus, VisitType,
};
use crate::services::clock::{ClinicCalendar, Clock};
use crate::services::events::{EventKind, Fanout};
use crate::services::sequencer::QueueSequencer;
use crate::services::store::{SchedulingStore, StoreError};

/// Pure transition rules for appointment and queue status.
///
/// Every method returns the next version of the record, or `None` when the
/// requested state is already in place.
pub struct QueueStateMachine;

impl QueueStateMachine {
    /// Queue statuses reachable from the appointment's current state.
    pub fn valid_queue_targets(appointment: &Appointment) -> Vec<QueueStatus> {
        if appointment.is_terminal()
            || appointment.status == AppointmentStatus::Pending
            || !appointment.arrived
        {
            return vec![];
        }

        let mut targets = vec![QueueStatus::Waiting, QueueStatus::Called];
        if appointment.called_at.is_some() {
            targets.extend([QueueStatus::InProgress, QueueStatus::Skipped, QueueStatus::Served]);
        }
        targets
    }

    pub fn validate_queue_transition(
        appointment: &Appointment,
        target: QueueStatus,
    ) -> Result<(), AppointmentError> {
        if Self::valid_queue_targets(appointment).contains(&target) {
            return Ok(());
        }

        warn!(
            "Invalid queue transition for {}: {} -> {}",
            appointment.id,
            appointment.state_label(),
            target
        );
        Err(AppointmentError::InvalidTransition {
            from: appointment.state_label(),
            to: target.to_string(),
        })
    }

    pub fn transition_queue(
        appointment: &Appointment,
        target: QueueStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        if appointment.queue_status == Some(target) && !appointment.is_terminal() {
            return Ok(None);
        }
        Self::validate_queue_transition(appointment, target)?;

        let mut next = appointment.clone();
        next.queue_status = Some(target);
        next.updated_at = now;

        match target {
            QueueStatus::Waiting => {
                next.called_at = None;
                next.started_at = None;
            }
            QueueStatus::Called => {
                next.called_at = Some(now);
                next.started_at = None;
            }
            QueueStatus::InProgress => {
                next.started_at.get_or_insert(now);
            }
            QueueStatus::Skipped => {}
            QueueStatus::Served => {
                next.status = AppointmentStatus::Completed;
                next.served_at = Some(now);
            }
        }

        Ok(Some(next))
    }

    pub fn confirm(appointment: &Appointment, now: DateTime<Utc>) -> Result<Option<Appointment>, AppointmentError> {
        match appointment.status {
            AppointmentStatus::Confirmed => Ok(None),
            AppointmentStatus::Pending => {
                let mut next = appointment.clone();
                next.status = AppointmentStatus::Confirmed;
                next.confirmed_at = Some(now);
                next.updated_at = now;
                Ok(Some(next))
            }
            other => Err(AppointmentError::InvalidState(format!(
                "cannot confirm a {} appointment",
                other
            ))),
        }
    }

    pub fn cancel(appointment: &Appointment, now: DateTime<Utc>) -> Result<Appointment, AppointmentError> {
        if appointment.status != AppointmentStatus::Pending {
            return Err(AppointmentError::InvalidState(format!(
                "only pending appointments can be cancelled, this one is {}",
                appointment.status
            )));
        }

        let mut next = appointment.clone();
        next.status = AppointmentStatus::Cancelled;
        next.cancelled_at = Some(now);
        next.updated_at = now;
        Ok(next)
    }

    /// Mark the patient as arrived and place them in today's queue. The queue
    /// number itself is drawn by the store when this version is committed.
    pub fn arrive(
        appointment: &Appointment,
        request: &ConfirmArrivalRequest,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        match appointment.status {
            AppointmentStatus::Confirmed => {}
            AppointmentStatus::Pending => return Err(AppointmentError::NotConfirmedYet),
            other => {
                return Err(AppointmentError::InvalidState(format!(
                    "cannot confirm arrival for a {} appointment",
                    other
                )))
            }
        }
        if appointment.arrived {
            return Err(AppointmentError::AlreadyArrived);
        }

        let mut next = appointment.clone();
        next.arrived = true;
        next.arrived_at = Some(now);
        next.queue_date = Some(today);
        next.queue_status = Some(QueueStatus::Waiting);
        next.queue_number = None;
        next.updated_at = now;

        if let Some(provider_id) = request.provider_override {
            next.provider_id = provider_id;
        }
        if request.convert_to_today && next.date != today {
            next.date = today;
            next.visit_type = VisitType::WalkIn;
        }

        Ok(next)
    }

    pub fn reprioritize(
        appointment: &Appointment,
        priority_tier: Option<PriorityTier>,
        visit_type: Option<VisitType>,
        now: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        if appointment.is_terminal() {
            return Err(AppointmentError::InvalidState(format!(
                "cannot reprioritize a {} appointment",
                appointment.status
            )));
        }

        let mut next = appointment.clone();
        if let Some(tier) = priority_tier {
            next.priority_tier = tier;
        }
        if let Some(visit_type) = visit_type {
            next.visit_type = visit_type;
        }

        if next.priority_tier == appointment.priority_tier && next.visit_type == appointment.visit_type {
            return Ok(None);
        }
        next.updated_at = now;
        Ok(Some(next))
    }
}

/// Applies state machine transitions to stored appointments with optimistic
/// concurrency and publishes the resulting events.
pub struct AppointmentLifecycleService {
    store: Arc<dyn SchedulingStore>,
    sequencer: QueueSequencer,
    clock: Arc<dyn Clock>,
    calendar: ClinicCalendar,
    fanout: Fanout,
    max_retry_attempts: u32,
}

impl AppointmentLifecycleService {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        clock: Arc<dyn Clock>,
        calendar: ClinicCalendar,
        fanout: Fanout,
    ) -> Self {
        Self {
            sequencer: QueueSequencer::new(store.clone()),
            store,
            clock,
            calendar,
            fanout,
            max_retry_attempts: 3,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        Ok(self.store.get_appointment(id).await?)
    }

    pub async fn confirm(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        let (appointment, changed) = self
            .mutate(id, |current, now| QueueStateMachine::confirm(current, now))
            .await?;

        if changed {
            info!("Appointment {} confirmed", id);
            self.fanout.emit(EventKind::AppointmentConfirmed, &appointment, self.clock.now());
        }
        Ok(appointment)
    }

    pub async fn cancel(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        let (appointment, _) = self
            .mutate(id, |current, now| QueueStateMachine::cancel(current, now).map(Some))
            .await?;

        info!("Appointment {} cancelled, slot {} released", id, appointment.slot_key());
        self.fanout.emit(EventKind::QueueUpdated, &appointment, self.clock.now());
        Ok(appointment)
    }

    pub async fn confirm_arrival(
        &self,
        id: Uuid,
        request: &ConfirmArrivalRequest,
    ) -> Result<Appointment, AppointmentError> {
        for attempt in 1..=self.max_retry_attempts {
            let current = self.store.get_appointment(id).await?;
            let now = self.clock.now();
            let next = QueueStateMachine::arrive(&current, request, self.calendar.day_of(now), now)?;

            match self.sequencer.stamp_arrival(&current, next).await {
                Ok(arrived) => {
                    info!(
                        "Patient arrived for appointment {}, queue number {:?} on {:?}",
                        id, arrived.queue_number, arrived.queue_date
                    );
                    self.fanout.emit(EventKind::QueueNumberAssigned, &arrived, now);
                    self.fanout.emit(EventKind::QueueUpdated, &arrived, now);
                    return Ok(arrived);
                }
                Err(StoreError::VersionConflict) => {
                    warn!(
                        "Concurrent update on appointment {} during arrival, retrying attempt {}/{}",
                        id, attempt, self.max_retry_attempts
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppointmentError::ConcurrentModification)
    }

    pub async fn set_queue_status(
        &self,
        id: Uuid,
        target: QueueStatus,
    ) -> Result<Appointment, AppointmentError> {
        let (appointment, changed) = self
            .mutate(id, |current, now| QueueStateMachine::transition_queue(current, target, now))
            .await?;

        if changed {
            info!("Appointment {} queue status set to {}", id, target);
            self.publish_queue_change(&appointment, target);
        } else {
            debug!("Appointment {} already {}", id, target);
        }
        Ok(appointment)
    }

    /// Optimistic transition used by call-next: fails fast on a lost race so the
    /// caller can pick another candidate.
    pub async fn call(&self, current: &Appointment) -> Result<Appointment, AppointmentError> {
        let now = self.clock.now();
        let next = QueueStateMachine::transition_queue(current, QueueStatus::Called, now)?
            .ok_or(AppointmentError::ConcurrentModification)?;

        let called = self.store.update_appointment(current, next).await?;
        info!("Called appointment {} (queue number {:?})", called.id, called.queue_number);
        self.publish_queue_change(&called, QueueStatus::Called);
        Ok(called)
    }

    pub async fn set_priority(
        &self,
        id: Uuid,
        priority_tier: Option<PriorityTier>,
        visit_type: Option<VisitType>,
    ) -> Result<Appointment, AppointmentError> {
        let (appointment, changed) = self
            .mutate(id, |current, now| {
                QueueStateMachine::reprioritize(current, priority_tier, visit_type, now)
            })
            .await?;

        if changed {
            info!(
                "Appointment {} now {} / {}",
                id, appointment.priority_tier, appointment.visit_type
            );
            self.fanout.emit(EventKind::QueueUpdated, &appointment, self.clock.now());
        }
        Ok(appointment)
    }

    fn publish_queue_change(&self, appointment: &Appointment, target: QueueStatus) {
        let now = self.clock.now();
        if target == QueueStatus::Called {
            self.fanout.emit(EventKind::PatientCalled, appointment, now);
        }
        self.fanout.emit(EventKind::QueueStatusChanged, appointment, now);
        self.fanout.emit(EventKind::QueueUpdated, appointment, now);
    }

    /// Read, transform and compare-and-set, retrying on version conflicts.
    /// Returns the stored record and whether anything was written.
    async fn mutate<F>(&self, id: Uuid, transition: F) -> Result<(Appointment, bool), AppointmentError>
    where
        F: Fn(&Appointment, DateTime<Utc>) -> Result<Option<Appointment>, AppointmentError>,
    {
        for attempt in 1..=self.max_retry_attempts {
            let current = self.store.get_appointment(id).await?;

            let Some(next) = transition(&current, self.clock.now())? else {
                return Ok((current, false));
            };

            match self.store.update_appointment(&current, next).await {
                Ok(stored) => return Ok((stored, true)),
                Err(StoreError::VersionConflict) => {
                    warn!(
                        "Concurrent update on appointment {}, retrying attempt {}/{}",
                        id, attempt, self.max_retry_attempts
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppointmentError::ConcurrentModification)
    }
}

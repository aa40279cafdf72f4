use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::auth::{Role, User};

use crate::models::{Appointment, AppointmentStatus, PriorityTier, QueueStatus, VisitType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    QueueUpdated,
    PatientCalled,
    QueueNumberAssigned,
    QueueStatusChanged,
    AppointmentConfirmed,
}

impl EventKind {
    /// Whether the affected patient's own channel receives this kind.
    pub fn reaches_patient(&self) -> bool {
        matches!(
            self,
            EventKind::PatientCalled
                | EventKind::QueueNumberAssigned
                | EventKind::AppointmentConfirmed
                | EventKind::QueueStatusChanged
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "audience", content = "patient_id", rename_all = "snake_case")]
pub enum Audience {
    Admin,
    Provider,
    Patient(Uuid),
}

impl Audience {
    pub fn channel_name(&self) -> String {
        match self {
            Audience::Admin => "admin".to_string(),
            Audience::Provider => "provider".to_string(),
            Audience::Patient(id) => format!("patient:{}", id),
        }
    }

    /// The channel a connected user listens on.
    pub fn for_user(user: &User) -> Self {
        match user.role {
            Role::Admin => Audience::Admin,
            Role::Doctor | Role::Nurse => Audience::Provider,
            Role::Patient => Audience::Patient(user.id),
        }
    }
}

/// Denormalized view carried by events; consumers re-fetch for anything authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentSnapshot {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub queue_status: Option<QueueStatus>,
    pub priority_tier: PriorityTier,
    pub visit_type: VisitType,
    pub queue_number: Option<u32>,
    pub queue_date: Option<NaiveDate>,
    pub called_at: Option<DateTime<Utc>>,
}

impl From<&Appointment> for AppointmentSnapshot {
    fn from(appointment: &Appointment) -> Self {
        Self {
            id: appointment.id,
            patient_id: appointment.patient_id,
            provider_id: appointment.provider_id,
            date: appointment.date,
            time: appointment.time,
            status: appointment.status,
            queue_status: appointment.queue_status,
            priority_tier: appointment.priority_tier,
            visit_type: appointment.visit_type,
            queue_number: appointment.queue_number,
            queue_date: appointment.queue_date,
            called_at: appointment.called_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEvent {
    pub event_id: Uuid,
    pub kind: EventKind,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub snapshot: AppointmentSnapshot,
    pub emitted_at: DateTime<Utc>,
}

impl QueueEvent {
    pub fn new(kind: EventKind, appointment: &Appointment, now: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            appointment_id: appointment.id,
            patient_id: appointment.patient_id,
            provider_id: appointment.provider_id,
            snapshot: AppointmentSnapshot::from(appointment),
            emitted_at: now,
        }
    }

    pub fn audiences(&self) -> Vec<Audience> {
        let mut audiences = vec![Audience::Admin, Audience::Provider];
        if self.kind.reaches_patient() {
            audiences.push(Audience::Patient(self.patient_id));
        }
        audiences
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Publication timed out after {0} ms")]
    Timeout(u64),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &QueueEvent) -> Result<(), PublishError>;

    fn name(&self) -> &'static str;
}

/// Delivers to every attached transport; one failing transport does not stop the others.
pub struct CompositePublisher {
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl CompositePublisher {
    pub fn new(publishers: Vec<Arc<dyn EventPublisher>>) -> Self {
        Self { publishers }
    }
}

#[async_trait]
impl EventPublisher for CompositePublisher {
    async fn publish(&self, event: &QueueEvent) -> Result<(), PublishError> {
        let results = join_all(self.publishers.iter().map(|p| p.publish(event))).await;

        let mut first_error = None;
        for (publisher, result) in self.publishers.iter().zip(results) {
            if let Err(e) = result {
                warn!("Publisher {} failed for event {}: {}", publisher.name(), event.event_id, e);
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

/// Fire-and-forget publication with a bounded timeout. Never fails the caller.
#[derive(Clone)]
pub struct Fanout {
    publisher: Option<Arc<dyn EventPublisher>>,
    timeout: Duration,
}

impl Fanout {
    pub fn new(publisher: Option<Arc<dyn EventPublisher>>, timeout: Duration) -> Self {
        Self { publisher, timeout }
    }

    pub fn emit(&self, kind: EventKind, appointment: &Appointment, now: DateTime<Utc>) {
        self.publish(QueueEvent::new(kind, appointment, now));
    }

    pub fn publish(&self, event: QueueEvent) {
        let Some(publisher) = self.publisher.clone() else {
            debug!("No event transport attached, dropping {:?} for {}", event.kind, event.appointment_id);
            return;
        };

        let timeout = self.timeout;
        tokio::spawn(async move {
            deliver(publisher.as_ref(), &event, timeout).await;
        });
    }
}

async fn deliver(publisher: &dyn EventPublisher, event: &QueueEvent, timeout: Duration) {
    match tokio::time::timeout(timeout, publisher.publish(event)).await {
        Ok(Ok(())) => debug!("Published {:?} for appointment {}", event.kind, event.appointment_id),
        Ok(Err(e)) => warn!("Failed to publish {:?} for appointment {}: {}", event.kind, event.appointment_id, e),
        Err(_) => warn!(
            "{}",
            PublishError::Timeout(timeout.as_millis() as u64)
        ),
    }
}

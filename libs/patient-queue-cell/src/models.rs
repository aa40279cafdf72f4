use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use appointment_cell::models::{Appointment, PriorityTier, QueueStatus, VisitType};

/// One ranked entry of today's waiting list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntryView {
    pub appointment: Appointment,
    pub score: i64,
    /// Zero-based position among waiting entries.
    pub rank: usize,
    pub estimated_start: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSnapshot {
    pub date: NaiveDate,
    pub provider_id: Option<Uuid>,
    pub waiting: Vec<QueueEntryView>,
    /// Called or in progress.
    pub in_service: Vec<Appointment>,
    pub skipped: Vec<Appointment>,
    pub served: Vec<Appointment>,
    /// Bookings converted to walk-ins while building this snapshot.
    pub converted: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionResponse {
    pub appointment_id: Uuid,
    pub queue_number: Option<u32>,
    pub queue_status: Option<QueueStatus>,
    pub rank: Option<usize>,
    pub ahead: usize,
    pub estimated_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallNextRequest {
    pub provider_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateQueueStatusRequest {
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePriorityRequest {
    pub priority_tier: Option<PriorityTier>,
    pub visit_type: Option<VisitType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueQuery {
    pub provider_id: Option<Uuid>,
}

/// Outcome of `call_next`.
#[derive(Debug, Clone, PartialEq)]
pub enum CallNextOutcome {
    Called(Appointment),
    Empty,
}

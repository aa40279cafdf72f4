// libs/appointment-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub reason: String,
    pub visit_type: VisitType,
    pub status: AppointmentStatus,
    pub queue_status: Option<QueueStatus>,
    pub priority_tier: PriorityTier,
    pub arrived: bool,
    pub arrived_at: Option<DateTime<Utc>>,
    pub queue_number: Option<u32>,
    pub queue_date: Option<NaiveDate>,
    pub called_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub served_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Appointment {
    /// A freshly reserved booking, before the store assigns its first version.
    pub fn new_booking(
        patient_id: Uuid,
        slot: &SlotKey,
        reason: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            provider_id: slot.provider_id,
            date: slot.date,
            time: slot.time,
            reason,
            visit_type: VisitType::Booking,
            status: AppointmentStatus::Pending,
            queue_status: None,
            priority_tier: PriorityTier::Regular,
            arrived: false,
            arrived_at: None,
            queue_number: None,
            queue_date: None,
            called_at: None,
            started_at: None,
            served_at: None,
            confirmed_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            provider_id: self.provider_id,
            date: self.date,
            time: self.time,
        }
    }

    /// Non-cancelled appointments keep their slot claimed.
    pub fn holds_slot(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_waiting(&self) -> bool {
        self.queue_status == Some(QueueStatus::Waiting)
    }

    /// Combined label used in transition errors and logs.
    pub fn state_label(&self) -> String {
        match &self.queue_status {
            Some(queue_status) => format!("{}+{}", self.status, queue_status),
            None => self.status.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum QueueStatus {
    Waiting,
    Called,
    InProgress,
    Served,
    Skipped,
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueStatus::Waiting => write!(f, "waiting"),
            QueueStatus::Called => write!(f, "called"),
            QueueStatus::InProgress => write!(f, "in-progress"),
            QueueStatus::Served => write!(f, "served"),
            QueueStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    Regular,
    Priority,
    Emergency,
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityTier::Regular => write!(f, "regular"),
            PriorityTier::Priority => write!(f, "priority"),
            PriorityTier::Emergency => write!(f, "emergency"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum VisitType {
    Booking,
    WalkIn,
}

impl fmt::Display for VisitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisitType::Booking => write!(f, "booking"),
            VisitType::WalkIn => write!(f, "walk-in"),
        }
    }
}

// ==============================================================================
// SLOT MODELS
// ==============================================================================

/// One bookable window: (provider, date, time).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl SlotKey {
    pub fn new(provider_id: Uuid, date: NaiveDate, time: NaiveTime) -> Self {
        Self { provider_id, date, time }
    }

    /// Stable storage suffix, e.g. `<provider>:2025-01-10:10:00`.
    pub fn storage_suffix(&self) -> String {
        format!(
            "{}:{}:{:02}:{:02}",
            self.provider_id,
            self.date.format("%Y-%m-%d"),
            self.time.hour(),
            self.time.minute()
        )
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.provider_id, self.date, self.time.format("%H:%M"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotHold {
    pub slot: SlotKey,
    pub patient_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl SlotHold {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Parse a clinic wall-clock time once, at write time.
///
/// Accepts `HH:MM`, `HH:MM:SS` and 12-hour forms such as `9:30 AM` or `09:30pm`.
/// Seconds are dropped so equivalent spellings map to the same slot.
pub fn parse_clinic_time(raw: &str) -> Result<NaiveTime, AppointmentError> {
    let normalized = raw.trim().to_ascii_uppercase();
    if normalized.is_empty() {
        return Err(AppointmentError::ValidationError("time is required".to_string()));
    }

    let compact = normalized.replace(' ', "");
    let parsed = ["%H:%M", "%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(&normalized, format).ok())
        .or_else(|| {
            ["%I:%M%p", "%I:%M:%S%p"]
                .iter()
                .find_map(|format| NaiveTime::parse_from_str(&compact, format).ok())
        })
        .ok_or_else(|| AppointmentError::ValidationError(format!("unrecognized time: {}", raw)))?;

    NaiveTime::from_hms_opt(parsed.hour(), parsed.minute(), 0)
        .ok_or_else(|| AppointmentError::ValidationError(format!("unrecognized time: {}", raw)))
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldSlotRequest {
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSlotRequest {
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
    #[serde(default)]
    pub reason: String,
    /// Staff may book on behalf of a patient; ignored for patient callers.
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmArrivalRequest {
    pub provider_override: Option<Uuid>,
    #[serde(default)]
    pub convert_to_today: bool,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("Slot is currently held by another patient")]
    SlotUnavailable,

    #[error("Slot has just been taken")]
    SlotTaken,

    #[error("Daily booking limit of {limit} reached")]
    DailyLimitExceeded { limit: usize },

    #[error("Appointment not found")]
    NotFound,

    #[error("Appointment cannot be changed in its current state: {0}")]
    InvalidState(String),

    #[error("Appointment has not been confirmed by the provider yet")]
    NotConfirmedYet,

    #[error("Patient arrival has already been confirmed")]
    AlreadyArrived,

    #[error("Invalid queue transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Unauthorized access to appointment")]
    Unauthorized,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Appointment was modified concurrently, please retry")]
    ConcurrentModification,

    #[error("Scheduling storage unavailable: {0}")]
    Unavailable(String),
}

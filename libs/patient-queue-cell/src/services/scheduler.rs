use std::cmp::{Ordering, Reverse};

use chrono::{DateTime, Duration, Utc};

use appointment_cell::models::{Appointment, PriorityTier, VisitType};
use appointment_cell::services::ClinicCalendar;

use crate::models::QueueEntryView;

pub const EMERGENCY_WEIGHT: i64 = 1000;
pub const PRIORITY_WEIGHT: i64 = 500;
pub const PROXIMITY_WINDOW_MINUTES: i64 = 300;
pub const WAIT_BONUS_CAP_MINUTES: i64 = 200;

pub fn priority_weight(tier: PriorityTier) -> i64 {
    match tier {
        PriorityTier::Emergency => EMERGENCY_WEIGHT,
        PriorityTier::Priority => PRIORITY_WEIGHT,
        PriorityTier::Regular => 0,
    }
}

/// Ranks waiting patients by tier, then composite score, then arrival order.
#[derive(Debug, Clone, Copy)]
pub struct PriorityScheduler {
    calendar: ClinicCalendar,
    average_minutes_per_patient: i64,
}

impl PriorityScheduler {
    pub fn new(calendar: ClinicCalendar, average_minutes_per_patient: i64) -> Self {
        Self {
            calendar,
            average_minutes_per_patient: average_minutes_per_patient.max(0),
        }
    }

    /// Bookings close to their scheduled time get up to 300 points; walk-ins none.
    pub fn proximity_bonus(&self, appointment: &Appointment, now: DateTime<Utc>) -> i64 {
        if appointment.visit_type != VisitType::Booking {
            return 0;
        }
        let scheduled = self.calendar.scheduled_at(appointment.date, appointment.time);
        let minutes_off = (now - scheduled).num_minutes().abs();
        (PROXIMITY_WINDOW_MINUTES - minutes_off).max(0)
    }

    pub fn wait_bonus(&self, appointment: &Appointment, now: DateTime<Utc>) -> i64 {
        appointment
            .arrived_at
            .map(|arrived| (now - arrived).num_minutes().clamp(0, WAIT_BONUS_CAP_MINUTES))
            .unwrap_or(0)
    }

    pub fn score(&self, appointment: &Appointment, now: DateTime<Utc>) -> i64 {
        priority_weight(appointment.priority_tier)
            + self.proximity_bonus(appointment, now)
            + self.wait_bonus(appointment, now)
    }

    /// Total order used for "who is next". The tier is compared before the
    /// score so no combination of bonuses lets a lower tier overtake.
    pub fn compare(&self, a: &Appointment, b: &Appointment, now: DateTime<Utc>) -> Ordering {
        let key = |x: &Appointment| {
            (
                Reverse(x.priority_tier),
                Reverse(self.score(x, now)),
                x.queue_number.unwrap_or(u32::MAX),
                x.created_at,
            )
        };
        key(a).cmp(&key(b))
    }

    /// Sort waiting entries and attach score, rank and estimated start.
    pub fn rank(&self, mut waiting: Vec<Appointment>, now: DateTime<Utc>) -> Vec<QueueEntryView> {
        waiting.sort_by(|a, b| self.compare(a, b, now));

        waiting
            .into_iter()
            .enumerate()
            .map(|(rank, appointment)| QueueEntryView {
                score: self.score(&appointment, now),
                estimated_start: self.estimate_start(rank, now),
                rank,
                appointment,
            })
            .collect()
    }

    pub fn estimate_start(&self, rank: usize, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::minutes(rank as i64 * self.average_minutes_per_patient)
    }
}

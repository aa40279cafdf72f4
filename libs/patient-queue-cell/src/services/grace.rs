use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use appointment_cell::models::{Appointment, VisitType};
use appointment_cell::services::ClinicCalendar;

#[derive(Debug, Clone, PartialEq)]
pub struct GraceConversion {
    pub appointments: Vec<Appointment>,
    /// Ids whose visit type changed in this pass.
    pub converted: Vec<Uuid>,
}

/// Bookings whose patient has not arrived by the scheduled time plus `grace`
/// lose their slot-proximity treatment and are ranked as walk-ins.
///
/// Pure and idempotent: a second pass over its own output converts nothing.
pub fn convert_late_bookings(
    now: DateTime<Utc>,
    grace: Duration,
    calendar: &ClinicCalendar,
    appointments: Vec<Appointment>,
) -> GraceConversion {
    let mut converted = Vec::new();

    let appointments = appointments
        .into_iter()
        .map(|mut appointment| {
            if is_late(&appointment, now, grace, calendar) {
                appointment.visit_type = VisitType::WalkIn;
                appointment.updated_at = now;
                converted.push(appointment.id);
            }
            appointment
        })
        .collect();

    GraceConversion {
        appointments,
        converted,
    }
}

fn is_late(appointment: &Appointment, now: DateTime<Utc>, grace: Duration, calendar: &ClinicCalendar) -> bool {
    appointment.visit_type == VisitType::Booking
        && !appointment.arrived
        && !appointment.is_terminal()
        && calendar.scheduled_at(appointment.date, appointment.time) + grace < now
}

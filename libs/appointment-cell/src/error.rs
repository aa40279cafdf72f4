use shared_models::error::AppError;

use crate::models::AppointmentError;

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        let message = err.to_string();
        match err {
            AppointmentError::SlotUnavailable => AppError::Conflict {
                code: "SlotUnavailable",
                message,
            },
            AppointmentError::SlotTaken => AppError::Conflict {
                code: "SlotTaken",
                message,
            },
            AppointmentError::ConcurrentModification => AppError::Conflict {
                code: "ConcurrentModification",
                message,
            },
            AppointmentError::DailyLimitExceeded { .. } => AppError::TooManyRequests(message),
            AppointmentError::NotFound => AppError::NotFound(message),
            AppointmentError::InvalidState(_) => AppError::InvalidState {
                code: "InvalidState",
                message,
            },
            AppointmentError::NotConfirmedYet => AppError::InvalidState {
                code: "NotConfirmedYet",
                message,
            },
            AppointmentError::AlreadyArrived => AppError::InvalidState {
                code: "AlreadyArrived",
                message,
            },
            AppointmentError::InvalidTransition { .. } => AppError::InvalidState {
                code: "InvalidTransition",
                message,
            },
            AppointmentError::Unauthorized => AppError::Forbidden(message),
            AppointmentError::ValidationError(_) => AppError::ValidationError(message),
            AppointmentError::Unavailable(_) => AppError::Unavailable(message),
        }
    }
}

use thiserror::Error;

use appointment_cell::models::AppointmentError;
use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error(transparent)]
    Appointment(#[from] AppointmentError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Patient has no queue entry today")]
    NotInQueue,
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Appointment(inner) => AppError::from(inner),
            QueueError::ValidationError(msg) => AppError::ValidationError(msg),
            QueueError::NotInQueue => AppError::NotFound("Patient has no queue entry today".to_string()),
        }
    }
}

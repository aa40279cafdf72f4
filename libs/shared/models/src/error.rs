use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid state: {message}")]
    InvalidState { code: &'static str, message: String },

    #[error("Conflict: {message}")]
    Conflict { code: &'static str, message: String },

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidState { .. } => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "Unauthenticated",
            AppError::Forbidden(_) => "Unauthorized",
            AppError::NotFound(_) => "NotFound",
            AppError::ValidationError(_) => "ValidationError",
            AppError::InvalidState { code, .. } | AppError::Conflict { code, .. } => *code,
            AppError::TooManyRequests(_) => "DailyLimitExceeded",
            AppError::Unavailable(_) => "Unavailable",
        }
    }

    fn message(&self) -> &str {
        match self {
            AppError::Auth(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::ValidationError(msg)
            | AppError::TooManyRequests(msg)
            | AppError::Unavailable(msg) => msg,
            AppError::InvalidState { message, .. } | AppError::Conflict { message, .. } => message,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.message().to_string();

        // Expected outcomes (conflicts, bad states) are not server faults.
        if status.is_server_error() {
            tracing::error!("Error: {}: {}", status, message);
        } else {
            tracing::debug!("Request rejected: {} {}: {}", status, code, message);
        }

        let body = Json(json!({
            "error": code,
            "message": message
        }));

        (status, body).into_response()
    }
}

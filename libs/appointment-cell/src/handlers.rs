// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shared_models::auth::{Role, User};
use shared_models::error::AppError;

use crate::models::{
    parse_clinic_time, Appointment, BookAppointmentRequest, ConfirmArrivalRequest,
    HoldSlotRequest, ReleaseSlotRequest, SlotKey,
};
use crate::state::AppState;

// ==============================================================================
// SLOT HOLD HANDLERS
// ==============================================================================

pub async fn hold_slot(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<HoldSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let slot = SlotKey::new(request.provider_id, request.date, parse_clinic_time(&request.time)?);

    let hold = state
        .reservations()
        .try_hold(slot, user.id, request.ttl_seconds)
        .await?;

    Ok(Json(json!({
        "success": true,
        "hold": hold,
        "expires_at": hold.expires_at
    })))
}

pub async fn release_slot(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<ReleaseSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let slot = SlotKey::new(request.provider_id, request.date, parse_clinic_time(&request.time)?);

    state.reservations().release(slot, user.id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Hold released"
    })))
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

pub async fn book_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    // Patients always book for themselves; staff book on a patient's behalf.
    let patient_id = match user.role {
        Role::Patient => user.id,
        _ => request.patient_id.ok_or_else(|| {
            AppError::ValidationError("patient_id is required when booking on behalf of a patient".to_string())
        })?,
    };

    let slot = SlotKey::new(request.provider_id, request.date, parse_clinic_time(&request.time)?);
    let appointment = state
        .reservations()
        .book(patient_id, slot, request.reason)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "appointment": appointment,
            "message": "Appointment booked, awaiting provider confirmation"
        })),
    ))
}

pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.lifecycle().get(appointment_id).await?;

    let is_owner = appointment.patient_id == user.id;
    if !is_owner && !user.is_staff() {
        return Err(AppError::Forbidden("Not authorized to view this appointment".to_string()));
    }

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let lifecycle = state.lifecycle();
    let appointment = lifecycle.get(appointment_id).await?;

    let is_owner = appointment.patient_id == user.id;
    if !is_owner && !user.is_admin() {
        return Err(AppError::Forbidden("Not authorized to cancel this appointment".to_string()));
    }

    let cancelled = lifecycle.cancel(appointment_id).await?;
    info!("Appointment {} cancelled by {}", appointment_id, user.id);

    Ok(Json(json!({
        "success": true,
        "appointment": cancelled,
        "message": "Appointment cancelled"
    })))
}

pub async fn confirm_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let lifecycle = state.lifecycle();
    let appointment = lifecycle.get(appointment_id).await?;
    ensure_provider_or_admin(&user, &appointment)?;

    let confirmed = lifecycle.confirm(appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": confirmed,
        "message": "Appointment confirmed"
    })))
}

pub async fn confirm_arrival(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<ConfirmArrivalRequest>,
) -> Result<Json<Value>, AppError> {
    if !matches!(user.role, Role::Admin | Role::Nurse) {
        return Err(AppError::Forbidden("Only front desk staff can confirm arrivals".to_string()));
    }

    let arrived = state.lifecycle().confirm_arrival(appointment_id, &request).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": arrived,
        "queue_number": arrived.queue_number,
        "queue_date": arrived.queue_date
    })))
}

fn ensure_provider_or_admin(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    let is_provider = user.role == Role::Doctor && appointment.provider_id == user.id;
    if is_provider || user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Only the assigned provider or an admin can confirm this appointment".to_string(),
        ))
    }
}

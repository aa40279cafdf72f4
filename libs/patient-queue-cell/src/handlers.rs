use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{Json, Response},
    Extension,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use appointment_cell::services::Audience;
use shared_models::{
    auth::{Role, User},
    error::AppError,
};

use crate::{
    models::{CallNextOutcome, CallNextRequest, QueueQuery, UpdatePriorityRequest, UpdateQueueStatusRequest},
    router::QueueState,
    services::{queue::QueueService, websocket::WebSocketReceiver},
};

fn require_staff(user: &User) -> Result<(), AppError> {
    if user.is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Queue operations are limited to clinic staff".to_string()))
    }
}

/// Today's ranked queue (staff only)
pub async fn get_today_queue(
    State(state): State<QueueState>,
    Extension(user): Extension<User>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let snapshot = QueueService::new(state.app.clone()).today(query.provider_id).await?;

    Ok(Json(json!({
        "success": true,
        "queue": snapshot
    })))
}

/// The calling patient's place in today's queue
pub async fn get_my_position(
    State(state): State<QueueState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if user.role != Role::Patient {
        return Err(AppError::Forbidden("Only patients have a queue position".to_string()));
    }

    let position = QueueService::new(state.app.clone()).position(user.id).await?;

    Ok(Json(json!({
        "success": true,
        "position": position
    })))
}

pub async fn call_next(
    State(state): State<QueueState>,
    Extension(user): Extension<User>,
    Json(request): Json<CallNextRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    // Doctors call from their own queue unless they name another provider.
    let provider_id = match (request.provider_id, user.role) {
        (Some(provider_id), _) => Some(provider_id),
        (None, Role::Doctor) => Some(user.id),
        (None, _) => None,
    };

    match QueueService::new(state.app.clone()).call_next(provider_id).await? {
        CallNextOutcome::Called(appointment) => {
            info!("{} called appointment {}", user.id, appointment.id);
            Ok(Json(json!({
                "success": true,
                "empty": false,
                "appointment": appointment
            })))
        }
        CallNextOutcome::Empty => Ok(Json(json!({
            "success": true,
            "empty": true
        }))),
    }
}

pub async fn update_queue_status(
    State(state): State<QueueState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateQueueStatusRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let appointment = QueueService::new(state.app.clone())
        .set_status(appointment_id, request.status)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

pub async fn update_priority(
    State(state): State<QueueState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdatePriorityRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let appointment = QueueService::new(state.app.clone())
        .set_priority(appointment_id, request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

/// Upgrade to a WebSocket carrying the caller's audience channel.
pub async fn queue_websocket(
    State(state): State<QueueState>,
    Extension(user): Extension<User>,
    ws: WebSocketUpgrade,
) -> Response {
    let audience = Audience::for_user(&user);
    let receiver = state.hub.subscribe(&audience).await;
    info!("Realtime subscription for {} on {}", user.id, audience.channel_name());

    ws.on_upgrade(move |socket| forward_events(socket, receiver, audience))
}

async fn forward_events(socket: WebSocket, mut receiver: WebSocketReceiver, audience: Audience) {
    let (mut sink, mut stream) = socket.split();
    let channel = audience.channel_name();

    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(message) => {
                    if sink.send(Message::Text(message.into())).await.is_err() {
                        debug!("Client on {} went away", channel);
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber on {} lagged, {} events dropped", channel, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("Realtime subscription on {} closed", channel);
}

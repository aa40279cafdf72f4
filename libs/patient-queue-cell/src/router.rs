use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use appointment_cell::AppState;
use shared_utils::extractor::auth_middleware;

use crate::handlers::{
    call_next,
    get_my_position,
    get_today_queue,
    queue_websocket,
    update_priority,
    update_queue_status,
};
use crate::services::websocket::RealtimeHub;

#[derive(Clone)]
pub struct QueueState {
    pub app: Arc<AppState>,
    pub hub: Arc<RealtimeHub>,
}

impl QueueState {
    pub fn new(app: Arc<AppState>, hub: Arc<RealtimeHub>) -> Self {
        Self { app, hub }
    }
}

pub fn create_queue_router(state: QueueState) -> Router {
    let protected_routes = Router::new()
        .route("/today", get(get_today_queue))
        .route("/position", get(get_my_position))
        .route("/next", post(call_next))
        .route("/{appointment_id}/status", put(update_queue_status))
        .route("/{appointment_id}/priority", put(update_priority))
        .route("/ws", get(queue_websocket))
        .layer(middleware::from_fn_with_state(state.app.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}

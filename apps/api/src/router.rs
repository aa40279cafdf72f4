use std::sync::Arc;

use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};

use appointment_cell::{appointment_routes, slot_routes, AppState};
use patient_queue_cell::{create_queue_router, QueueState};

pub fn create_router(state: Arc<AppState>, queue_state: QueueState) -> Router {
    let store_backend = if state.config.redis_url.is_some() { "redis" } else { "memory" };

    Router::new()
        .route("/", get(|| async { "Clinic queue API is running!" }))
        .route(
            "/health",
            get(move || async move { Json::<Value>(json!({ "status": "ok", "store": store_backend })) }),
        )
        .nest("/slots", slot_routes(state.clone()))
        .nest("/appointments", appointment_routes(state))
        .nest("/queue", create_queue_router(queue_state))
}

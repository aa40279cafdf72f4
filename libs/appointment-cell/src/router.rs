// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::state::AppState;

pub fn slot_routes(state: Arc<AppState>) -> Router {
    let protected_routes = Router::new()
        .route("/hold", post(handlers::hold_slot).delete(handlers::release_slot))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}

pub fn appointment_routes(state: Arc<AppState>) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/", post(handlers::book_appointment))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/cancel", put(handlers::cancel_appointment))
        .route("/{appointment_id}/confirm", put(handlers::confirm_appointment))
        .route("/{appointment_id}/confirm-arrival", put(handlers::confirm_arrival))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}

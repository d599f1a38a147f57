// libs/scheduling-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn scheduling_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        // Appointment booking and calendar
        .route("/batch", post(handlers::create_batch))
        .route("/search", get(handlers::search_appointments))
        .route("/grid", get(handlers::get_slot_grid))
        .route("/conflicts/check", get(handlers::check_conflicts))
        .route("/day-clear", post(handlers::clear_day))
        .route("/patients/{patient_id}/clear-future", post(handlers::clear_patient_future))
        .route("/therapists/{therapist_id}/clear-future", post(handlers::clear_therapist_future))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}", delete(handlers::delete_appointment))
        .route("/{appointment_id}/absence", post(handlers::mark_absent))
        .route("/{appointment_id}/replace", post(handlers::replace_appointment))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}

pub fn slot_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/", post(handlers::create_slot))
        .route("/materialize", post(handlers::materialize))
        .route("/{slot_id}", put(handlers::update_slot))
        .route("/{slot_id}/deactivate", post(handlers::deactivate_slot))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}

use std::sync::Arc;

use axum::{routing::get, Router};

use clinical_notes_cell::router::clinical_note_routes;
use patient_cell::router::patient_routes;
use reporting_cell::router::report_routes;
use scheduling_cell::router::{scheduling_routes, slot_routes};
use shared_config::AppConfig;
use therapist_cell::router::therapist_routes;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Vida Clinic API is running!" }))
        .nest("/patients", patient_routes(state.clone()))
        .nest("/therapists", therapist_routes(state.clone()))
        .nest("/appointments", scheduling_routes(state.clone()))
        .nest("/slots", slot_routes(state.clone()))
        .nest("/notes", clinical_note_routes(state.clone()))
        .nest("/reports", report_routes(state))
}

use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn report_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/attendance", get(handlers::attendance_report))
        .route("/patients", get(handlers::patient_absence_report))
        .route("/occupancy", get(handlers::occupancy_report))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn clinical_note_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/{appointment_id}", get(handlers::get_note))
        .route("/{appointment_id}", put(handlers::save_note))
        .route("/{appointment_id}/attachments", post(handlers::register_attachment))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}

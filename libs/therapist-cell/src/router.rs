use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn therapist_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/", post(handlers::create_therapist))
        .route("/", get(handlers::list_therapists))
        .route("/rooms", post(handlers::create_room))
        .route("/rooms", get(handlers::list_rooms))
        .route("/{therapist_id}", get(handlers::get_therapist))
        .route("/{therapist_id}", put(handlers::update_therapist))
        .route("/{therapist_id}", delete(handlers::delete_therapist))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}

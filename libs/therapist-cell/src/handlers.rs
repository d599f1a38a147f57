use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    CreateTherapistRequest, TherapistError, TherapistSearchQuery, UpdateTherapistRequest,
};
use crate::services::TherapistService;

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
}

fn map_therapist_error(e: TherapistError) -> AppError {
    match e {
        TherapistError::NotFound => AppError::NotFound("Therapist not found".to_string()),
        TherapistError::RoomNotFound => AppError::NotFound("Room not found".to_string()),
        TherapistError::HasAppointments => {
            AppError::Conflict("Therapist still has appointments and cannot be removed".to_string())
        }
        TherapistError::ValidationError(msg) => AppError::ValidationError(msg),
        TherapistError::DatabaseError(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn create_therapist(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateTherapistRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_owner() {
        return Err(AppError::Forbidden("Only the clinic owner can register staff".to_string()));
    }

    let service = TherapistService::new(&config);
    let therapist = service
        .create_therapist(request, auth.token())
        .await
        .map_err(map_therapist_error)?;

    Ok(Json(json!(therapist)))
}

#[axum::debug_handler]
pub async fn get_therapist(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
    Path(therapist_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = TherapistService::new(&config);
    let therapist = service
        .get_therapist(therapist_id, auth.token())
        .await
        .map_err(map_therapist_error)?;

    Ok(Json(json!(therapist)))
}

#[axum::debug_handler]
pub async fn list_therapists(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<TherapistSearchQuery>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Staff roster is restricted to administrative users".to_string()));
    }

    let service = TherapistService::new(&config);
    let therapists = service
        .list_therapists(query, auth.token())
        .await
        .map_err(map_therapist_error)?;

    Ok(Json(json!({
        "therapists": therapists,
        "total": therapists.len()
    })))
}

#[axum::debug_handler]
pub async fn update_therapist(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(therapist_id): Path<Uuid>,
    Json(request): Json<UpdateTherapistRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only administrative staff can edit therapists".to_string()));
    }

    let service = TherapistService::new(&config);
    let therapist = service
        .update_therapist(therapist_id, request, auth.token())
        .await
        .map_err(map_therapist_error)?;

    Ok(Json(json!(therapist)))
}

#[axum::debug_handler]
pub async fn delete_therapist(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(therapist_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    if !user.is_owner() {
        return Err(AppError::Forbidden("Only the clinic owner can remove staff".to_string()));
    }

    let service = TherapistService::new(&config);
    service
        .delete_therapist(therapist_id, auth.token())
        .await
        .map_err(map_therapist_error)?;

    Ok(Json(json!({ "success": true })))
}

#[axum::debug_handler]
pub async fn create_room(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only administrative staff can manage rooms".to_string()));
    }

    let service = TherapistService::new(&config);
    let room = service
        .create_room(&request.name, auth.token())
        .await
        .map_err(map_therapist_error)?;

    Ok(Json(json!(room)))
}

#[axum::debug_handler]
pub async fn list_rooms(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let service = TherapistService::new(&config);
    let rooms = service
        .list_rooms(auth.token())
        .await
        .map_err(map_therapist_error)?;

    Ok(Json(json!({ "rooms": rooms })))
}

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use scheduling_cell::models::Appointment;
use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use therapist_cell::services::TherapistService;

use crate::models::{NoteError, RegisterAttachmentRequest, SaveNoteRequest};
use crate::services::ClinicalNoteService;

fn map_note_error(e: NoteError) -> AppError {
    match e {
        NoteError::NotFound => AppError::NotFound("Clinical note not found".to_string()),
        NoteError::AppointmentNotFound => AppError::NotFound("Appointment not found".to_string()),
        NoteError::AppointmentNotEligible(msg) => AppError::BadRequest(msg),
        NoteError::AttachmentTooLarge => {
            AppError::ValidationError("Attachment exceeds the 10 MB limit".to_string())
        }
        NoteError::ValidationError(msg) => AppError::ValidationError(msg),
        NoteError::DatabaseError(msg) => AppError::Database(msg),
    }
}

/// Clinical narratives are the most sensitive data in the system: only the
/// clinic owner or the therapist who attends the patient may read or write
/// them. Plain administrative accounts are shut out.
async fn authorize_note_access(
    config: &AppConfig,
    user: &User,
    appointment: &Appointment,
    token: &str,
) -> Result<(), AppError> {
    if user.is_owner() {
        return Ok(());
    }

    if user.is_therapist() {
        let service = TherapistService::new(config);
        let own = service
            .get_therapist_by_user(&user.id, token)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        if own.map(|t| t.id) == Some(appointment.therapist_id) {
            return Ok(());
        }
        return Err(AppError::Forbidden(
            "This patient is attended by another professional".to_string(),
        ));
    }

    Err(AppError::Forbidden(
        "Administrative accounts have no access to clinical records".to_string(),
    ))
}

#[axum::debug_handler]
pub async fn get_note(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = ClinicalNoteService::new(&config);

    let appointment = service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_note_error)?;
    authorize_note_access(&config, &user, &appointment, token).await?;

    let note = service.get_note(appointment_id, token).await.map_err(map_note_error)?;
    let attachments = service
        .list_attachments(appointment_id, token)
        .await
        .map_err(map_note_error)?;

    Ok(Json(json!({
        "note": note,
        "attachments": attachments
    })))
}

#[axum::debug_handler]
pub async fn save_note(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<SaveNoteRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = ClinicalNoteService::new(&config);

    let appointment = service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_note_error)?;
    authorize_note_access(&config, &user, &appointment, token).await?;

    let note = service
        .save_note(appointment_id, &request.content, token)
        .await
        .map_err(map_note_error)?;

    Ok(Json(json!({
        "success": true,
        "note": note
    })))
}

#[axum::debug_handler]
pub async fn register_attachment(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RegisterAttachmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = ClinicalNoteService::new(&config);

    let appointment = service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_note_error)?;
    authorize_note_access(&config, &user, &appointment, token).await?;

    let attachment = service
        .register_attachment(appointment_id, request, token)
        .await
        .map_err(map_note_error)?;

    Ok(Json(json!(attachment)))
}

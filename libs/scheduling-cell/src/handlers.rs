// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::{Local, NaiveDate, NaiveTime};
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use therapist_cell::models::Therapist;
use therapist_cell::services::TherapistService;

use crate::models::{
    slot_grid, AppointmentSearchQuery, CreateBatchRequest, CreateSlotRequest, MarkAbsentRequest,
    ReplacementRequest, SchedulingError, UpdateSlotRequest,
};
use crate::services::booking::AppointmentBookingService;
use crate::services::cleanup::CleanupService;
use crate::services::conflict::ConflictDetectionService;
use crate::services::materializer::MaterializerService;
use crate::services::replacement::ReplacementService;
use shared_database::supabase::SupabaseClient;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct ConflictCheckQuery {
    pub therapist_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct MaterializeParams {
    pub horizon_days: Option<i64>,
    pub slot_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DayClearRequest {
    pub date: NaiveDate,
    pub therapist_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DeactivateSlotRequest {
    /// Sweeping the already materialized future rows is an explicit
    /// caller choice, never a side effect.
    #[serde(default)]
    pub cleanup_future: bool,
}

fn map_scheduling_error(e: SchedulingError) -> AppError {
    match e {
        SchedulingError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        SchedulingError::PatientNotFound => AppError::NotFound("Patient not found".to_string()),
        SchedulingError::TherapistNotFound => AppError::NotFound("Therapist not found".to_string()),
        SchedulingError::SlotNotFound => AppError::NotFound("Recurring slot not found".to_string()),
        SchedulingError::ConflictDetected => {
            AppError::Conflict("Time slot conflicts with an existing booking".to_string())
        }
        SchedulingError::InvalidTime(msg) => AppError::BadRequest(msg),
        SchedulingError::ValidationError(msg) => AppError::ValidationError(msg),
        SchedulingError::InvalidStatusTransition(status) => {
            AppError::BadRequest(format!("Appointment cannot change status from {}", status))
        }
        SchedulingError::AbsenceReasonRequired => {
            AppError::ValidationError("An absence reason is required".to_string())
        }
        SchedulingError::NotReplaceable(msg) => AppError::BadRequest(msg),
        SchedulingError::InvariantViolation(msg) => AppError::Internal(msg),
        SchedulingError::DatabaseError(msg) => AppError::Database(msg),
    }
}

/// The therapist profile linked to the logged-in user, required for
/// self-service actions.
async fn resolve_own_therapist(
    config: &AppConfig,
    user: &User,
    token: &str,
) -> Result<Therapist, AppError> {
    let service = TherapistService::new(config);
    service
        .get_therapist_by_user(&user.id, token)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?
        .ok_or_else(|| AppError::Forbidden("No therapist profile linked to this account".to_string()))
}

/// Admins act on any calendar; therapists only on their own.
async fn authorize_for_therapist(
    config: &AppConfig,
    user: &User,
    therapist_id: Uuid,
    token: &str,
) -> Result<(), AppError> {
    if user.is_admin() {
        return Ok(());
    }
    if user.is_therapist() {
        let own = resolve_own_therapist(config, user, token).await?;
        if own.id == therapist_id {
            return Ok(());
        }
    }
    Err(AppError::Forbidden("Not authorized for this therapist's calendar".to_string()))
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_batch(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateBatchRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    authorize_for_therapist(&config, &user, request.therapist_id, token).await?;

    let service = AppointmentBookingService::new(&config);
    let outcome = service
        .create_batch(request, token)
        .await
        .map_err(map_scheduling_error)?;

    if outcome.created == 0 && !outcome.conflicts.is_empty() {
        // Nothing booked at all; the caller gets the blocked dates back.
        return Ok(Json(json!({
            "success": false,
            "created": 0,
            "conflicts": outcome.conflicts,
            "message": "All requested dates are occupied"
        })));
    }

    Ok(Json(json!({
        "success": true,
        "created": outcome.created,
        "conflicts": outcome.conflicts
    })))
}

#[axum::debug_handler]
pub async fn check_conflicts(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
    Query(query): Query<ConflictCheckQuery>,
) -> Result<Json<Value>, AppError> {
    let supabase = Arc::new(SupabaseClient::new(&config));
    let service = ConflictDetectionService::new(supabase);

    let conflicts = service
        .find_conflicts(
            query.therapist_id,
            query.date,
            query.start_time,
            query.end_time,
            query.exclude_appointment_id,
            auth.token(),
        )
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "has_conflict": !conflicts.is_empty(),
        "conflicting_appointments": conflicts
    })))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(mut query): Query<AppointmentSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !user.is_admin() {
        if !user.is_therapist() {
            return Err(AppError::Forbidden("Calendar access is restricted to staff".to_string()));
        }
        // Therapists see their own calendar only.
        let own = resolve_own_therapist(&config, &user, token).await?;
        query.therapist_id = Some(own.id);
    }

    let service = AppointmentBookingService::new(&config);
    let appointments = service
        .search_appointments(query, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = AppointmentBookingService::new(&config);
    let appointment = service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    authorize_for_therapist(&config, &user, appointment.therapist_id, token).await?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn mark_absent(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<MarkAbsentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = AppointmentBookingService::new(&config);

    let appointment = service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;
    authorize_for_therapist(&config, &user, appointment.therapist_id, token).await?;

    let updated = service
        .mark_absent(appointment_id, request, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!(updated)))
}

#[axum::debug_handler]
pub async fn replace_appointment(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<ReplacementRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let booking_service = AppointmentBookingService::new(&config);
    let original = booking_service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;
    authorize_for_therapist(&config, &user, original.therapist_id, token).await?;

    let service = ReplacementService::new(&config);
    let substitute = service
        .replace(appointment_id, request, Local::now().naive_local(), token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": substitute,
        "message": "Slot filled; the vacating booking was archived as an absence"
    })))
}

#[axum::debug_handler]
pub async fn delete_appointment(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let service = AppointmentBookingService::new(&config);

    let appointment = service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;
    authorize_for_therapist(&config, &user, appointment.therapist_id, token).await?;

    service
        .delete_adhoc_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({ "success": true })))
}

#[axum::debug_handler]
pub async fn clear_day(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<DayClearRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let therapist_scope = if user.is_admin() {
        request.therapist_id
    } else if user.is_therapist() {
        Some(resolve_own_therapist(&config, &user, token).await?.id)
    } else {
        return Err(AppError::Forbidden("Calendar access is restricted to staff".to_string()));
    };

    let service = CleanupService::new(&config);
    let cleared = service
        .clear_day(request.date, therapist_scope, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({ "success": true, "cleared": cleared })))
}

#[axum::debug_handler]
pub async fn clear_patient_future(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let therapist_scope = if user.is_admin() {
        None
    } else if user.is_therapist() {
        Some(resolve_own_therapist(&config, &user, token).await?.id)
    } else {
        return Err(AppError::Forbidden("Calendar access is restricted to staff".to_string()));
    };

    let now = Local::now().naive_local();
    let service = CleanupService::new(&config);
    let cleared = service
        .clear_patient_future(patient_id, therapist_scope, now.date(), now.time(), token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({ "success": true, "cleared": cleared })))
}

#[axum::debug_handler]
pub async fn clear_therapist_future(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(therapist_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    authorize_for_therapist(&config, &user, therapist_id, token).await?;

    let now = Local::now().naive_local();
    let service = CleanupService::new(&config);
    let cleared = service
        .clear_therapist_future(therapist_id, now.date(), now.time(), token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({ "success": true, "cleared": cleared })))
}

#[axum::debug_handler]
pub async fn get_slot_grid(
    State(_config): State<Arc<AppConfig>>,
    Extension(_user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let grid: Vec<String> = slot_grid()
        .iter()
        .map(|t| t.format("%H:%M").to_string())
        .collect();

    Ok(Json(json!({ "slots": grid })))
}

// ==============================================================================
// RECURRING SLOT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_slot(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateSlotRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only administrative staff manage fixed schedules".to_string()));
    }

    let token = auth.token();
    let today = Local::now().date_naive();
    let service = MaterializerService::new(&config);

    let slot = service
        .create_slot(request, today, token)
        .await
        .map_err(map_scheduling_error)?;

    // New templates turn into concrete appointments right away.
    let outcome = service
        .materialize(None, Some(slot.id), today, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "slot": slot,
        "materialized": outcome.created
    })))
}

#[axum::debug_handler]
pub async fn update_slot(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<UpdateSlotRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only administrative staff manage fixed schedules".to_string()));
    }

    let today = Local::now().date_naive();
    let service = MaterializerService::new(&config);
    let (slot, outcome) = service
        .update_slot(slot_id, request, today, auth.token())
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "slot": slot,
        "reconciliation": outcome
    })))
}

#[axum::debug_handler]
pub async fn deactivate_slot(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<DeactivateSlotRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only administrative staff manage fixed schedules".to_string()));
    }

    let today = Local::now().date_naive();
    let service = MaterializerService::new(&config);
    let outcome = service
        .deactivate_slot(slot_id, request.cleanup_future, today, auth.token())
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "swept": outcome.deleted
    })))
}

#[axum::debug_handler]
pub async fn materialize(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(params): Query<MaterializeParams>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only administrative staff manage fixed schedules".to_string()));
    }

    let today = Local::now().date_naive();
    let service = MaterializerService::new(&config);
    let outcome = service
        .materialize(params.horizon_days, params.slot_id, today, auth.token())
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({ "created": outcome.created })))
}

use std::sync::Arc;

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use therapist_cell::services::TherapistService;

use crate::models::{AttendanceReportQuery, OccupancyQuery, PatientAbsenceQuery, ReportError};
use crate::services::ReportingService;

fn map_report_error(e: ReportError) -> AppError {
    match e {
        ReportError::ValidationError(msg) => AppError::ValidationError(msg),
        ReportError::DatabaseError(msg) => AppError::Database(msg),
    }
}

/// Admins report across the clinic; a therapist only over their own work.
async fn therapist_scope_for(
    config: &AppConfig,
    user: &User,
    requested: Option<uuid::Uuid>,
    token: &str,
) -> Result<Option<uuid::Uuid>, AppError> {
    if user.is_admin() {
        return Ok(requested);
    }
    if user.is_therapist() {
        let service = TherapistService::new(config);
        let own = service
            .get_therapist_by_user(&user.id, token)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| {
                AppError::Forbidden("No therapist profile linked to this account".to_string())
            })?;
        return Ok(Some(own.id));
    }
    Err(AppError::Forbidden("Reports are restricted to staff".to_string()))
}

#[axum::debug_handler]
pub async fn attendance_report(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(mut query): Query<AttendanceReportQuery>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    query.therapist_id = therapist_scope_for(&config, &user, query.therapist_id, token).await?;

    let service = ReportingService::new(&config);
    let report = service
        .monthly_attendance(query, token)
        .await
        .map_err(map_report_error)?;

    Ok(Json(json!(report)))
}

#[axum::debug_handler]
pub async fn patient_absence_report(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<PatientAbsenceQuery>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let scope = therapist_scope_for(&config, &user, None, token).await?;

    let service = ReportingService::new(&config);
    let ranking = service
        .patient_absence_ranking(query, scope, token)
        .await
        .map_err(map_report_error)?;

    Ok(Json(json!({
        "ranking": ranking,
        "total": ranking.len()
    })))
}

#[axum::debug_handler]
pub async fn occupancy_report(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<OccupancyQuery>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Occupancy reports are restricted to administrative staff".to_string()));
    }

    let service = ReportingService::new(&config);
    let grid = service
        .occupancy_grid(query.week_of, auth.token())
        .await
        .map_err(map_report_error)?;

    Ok(Json(json!(grid)))
}

// libs/scheduling-cell/src/services/booking.rs
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use patient_cell::models::{BillingType, Patient};
use shared_config::AppConfig;
use shared_database::supabase::{representation_headers, SupabaseClient};

use crate::models::{
    default_end_time, weekday_index, Appointment, AppointmentSearchQuery, AppointmentStatus,
    BatchOutcome, CreateBatchRequest, MarkAbsentRequest, Modality, SchedulingError,
    LAST_BOOKABLE_WEEKDAY, MAX_REPEAT_WEEKS,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::slot_lock::SlotLockService;

/// Everything needed to insert one appointment row. Shared by the batch
/// creator, the materializer and the replacement workflow so the write
/// shape exists in exactly one place.
pub(crate) struct NewAppointmentRecord {
    pub patient_id: Uuid,
    pub therapist_id: Uuid,
    pub room_id: Option<Uuid>,
    pub recurring_slot_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub billing_type: BillingType,
    pub modality: Option<Modality>,
}

pub(crate) async fn insert_appointment(
    supabase: &SupabaseClient,
    record: NewAppointmentRecord,
    auth_token: &str,
) -> Result<Appointment, SchedulingError> {
    let now = Utc::now();
    let appointment_data = json!({
        "id": Uuid::new_v4(),
        "patient_id": record.patient_id,
        "therapist_id": record.therapist_id,
        "room_id": record.room_id,
        "recurring_slot_id": record.recurring_slot_id,
        "date": record.date,
        "start_time": record.start_time,
        "end_time": record.end_time,
        "billing_type": record.billing_type,
        "modality": record.modality,
        "status": AppointmentStatus::Awaiting,
        "absence_reason": null,
        "absence_note": null,
        "deleted": false,
        "created_at": now.to_rfc3339(),
        "updated_at": now.to_rfc3339()
    });

    let result: Vec<Value> = supabase
        .request_with_headers(
            Method::POST,
            "/rest/v1/appointments",
            Some(auth_token),
            Some(appointment_data),
            Some(representation_headers()),
        )
        .await
        .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

    let row = result
        .into_iter()
        .next()
        .ok_or_else(|| SchedulingError::DatabaseError("Insert returned no rows".to_string()))?;
    serde_json::from_value(row)
        .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse appointment: {}", e)))
}

pub(crate) async fn fetch_patient(
    supabase: &SupabaseClient,
    patient_id: Uuid,
    auth_token: &str,
) -> Result<Patient, SchedulingError> {
    let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
    let result: Vec<Value> = supabase
        .request(Method::GET, &path, Some(auth_token), None)
        .await
        .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

    let row = result.into_iter().next().ok_or(SchedulingError::PatientNotFound)?;
    serde_json::from_value(row)
        .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse patient: {}", e)))
}

pub(crate) async fn verify_therapist_exists(
    supabase: &SupabaseClient,
    therapist_id: Uuid,
    auth_token: &str,
) -> Result<(), SchedulingError> {
    let path = format!("/rest/v1/therapists?id=eq.{}&limit=1", therapist_id);
    let result: Vec<Value> = supabase
        .request(Method::GET, &path, Some(auth_token), None)
        .await
        .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

    if result.is_empty() {
        return Err(SchedulingError::TherapistNotFound);
    }
    Ok(())
}

pub struct AppointmentBookingService {
    supabase: Arc<SupabaseClient>,
    conflict_service: ConflictDetectionService,
    lock_service: SlotLockService,
    lifecycle_service: AppointmentLifecycleService,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let conflict_service = ConflictDetectionService::new(Arc::clone(&supabase));
        let lock_service = SlotLockService::new(Arc::clone(&supabase));

        Self {
            conflict_service,
            lock_service,
            lifecycle_service: AppointmentLifecycleService::new(),
            supabase,
        }
    }

    /// Book a slot weekly for `repeat_weeks + 1` weeks. Conflicting weeks
    /// are skipped and reported; the business wants "book what's available,
    /// tell me what's not", so the batch is deliberately not all-or-nothing.
    pub async fn create_batch(
        &self,
        request: CreateBatchRequest,
        auth_token: &str,
    ) -> Result<BatchOutcome, SchedulingError> {
        info!(
            "Batch booking for patient {} with therapist {} starting {}",
            request.patient_id, request.therapist_id, request.date
        );

        let end_time = request.end_time.unwrap_or_else(|| default_end_time(request.start_time));
        self.validate_batch_request(&request, end_time)?;

        let patient = fetch_patient(&self.supabase, request.patient_id, auth_token).await?;
        verify_therapist_exists(&self.supabase, request.therapist_id, auth_token).await?;

        let mut created = 0u32;
        let mut conflicts = Vec::new();

        for week in 0..=request.repeat_weeks {
            let date = request.date + Duration::weeks(week as i64);

            let lock = match self
                .lock_service
                .acquire(request.therapist_id, date, request.start_time, auth_token)
                .await
            {
                Ok(lock) => lock,
                Err(SchedulingError::ConflictDetected) => {
                    conflicts.push(date);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let has_conflict = self
                .conflict_service
                .has_conflict(
                    request.therapist_id,
                    date,
                    request.start_time,
                    end_time,
                    None,
                    auth_token,
                )
                .await;

            let outcome = match has_conflict {
                Ok(true) => {
                    conflicts.push(date);
                    Ok(())
                }
                Ok(false) => {
                    let archived = self
                        .archive_stale_absences(
                            request.therapist_id,
                            date,
                            request.start_time,
                            end_time,
                            auth_token,
                        )
                        .await;

                    match archived {
                        Ok(()) => insert_appointment(
                            &self.supabase,
                            NewAppointmentRecord {
                                patient_id: request.patient_id,
                                therapist_id: request.therapist_id,
                                room_id: request.room_id,
                                recurring_slot_id: None,
                                date,
                                start_time: request.start_time,
                                end_time,
                                billing_type: patient.default_billing_type,
                                modality: None,
                            },
                            auth_token,
                        )
                        .await
                        .map(|_| created += 1),
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            };

            self.lock_service.release(&lock, auth_token).await?;
            outcome?;
        }

        info!(
            "Batch booking finished: {} created, {} conflicts",
            created,
            conflicts.len()
        );
        Ok(BatchOutcome { created, conflicts })
    }

    /// Fetches one appointment regardless of soft-delete state; detail and
    /// history views need the dead rows too.
    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Fetching appointment {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(SchedulingError::NotFound)?;
        serde_json::from_value(row).map_err(|e| {
            SchedulingError::DatabaseError(format!("Failed to parse appointment: {}", e))
        })
    }

    /// Calendar search. Queries the live set unless the caller explicitly
    /// opts into history via `include_deleted`.
    pub async fn search_appointments(
        &self,
        query: AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let mut query_parts = Vec::new();

        if !query.include_deleted {
            query_parts.push("deleted=is.false".to_string());
        }
        if let Some(therapist_id) = query.therapist_id {
            query_parts.push(format!("therapist_id=eq.{}", therapist_id));
        }
        if let Some(patient_id) = query.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(from_date) = query.from_date {
            query_parts.push(format!("date=gte.{}", from_date));
        }
        if let Some(to_date) = query.to_date {
            query_parts.push(format!("date=lte.{}", to_date));
        }

        query_parts.push("order=date.asc,start_time.asc".to_string());
        let mut path = format!("/rest/v1/appointments?{}", query_parts.join("&"));
        if let Some(limit) = query.limit {
            path.push_str(&format!("&limit={}", limit));
        }
        if let Some(offset) = query.offset {
            path.push_str(&format!("&offset={}", offset));
        }

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| {
                SchedulingError::DatabaseError(format!("Failed to parse appointments: {}", e))
            })
    }

    pub async fn mark_absent(
        &self,
        appointment_id: Uuid,
        request: MarkAbsentRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let appointment = self.get_appointment(appointment_id, auth_token).await?;
        if appointment.deleted {
            return Err(SchedulingError::NotFound);
        }

        self.lifecycle_service
            .validate_status_transition(&appointment.status, &AppointmentStatus::Absent)?;

        let update = json!({
            "status": AppointmentStatus::Absent,
            "absence_reason": request.reason,
            "absence_note": request.note,
            "updated_at": Utc::now().to_rfc3339()
        });

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(SchedulingError::NotFound)?;
        serde_json::from_value(row).map_err(|e| {
            SchedulingError::DatabaseError(format!("Failed to parse appointment: {}", e))
        })
    }

    /// Hard delete, reserved for genuinely erroneous ad-hoc entries that
    /// never reached Done. Everything else stays for history.
    pub async fn delete_adhoc_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        if !self.lifecycle_service.can_hard_delete(&appointment) {
            return Err(SchedulingError::ValidationError(
                "Only unconcluded ad-hoc appointments can be removed permanently".to_string(),
            ));
        }

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                Some(auth_token),
                None,
                Some(representation_headers()),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        info!("Appointment {} removed permanently", appointment_id);
        Ok(())
    }

    // ==========================================================================
    // PRIVATE HELPERS
    // ==========================================================================

    fn validate_batch_request(
        &self,
        request: &CreateBatchRequest,
        end_time: NaiveTime,
    ) -> Result<(), SchedulingError> {
        if end_time <= request.start_time {
            return Err(SchedulingError::InvalidTime(
                "End time must be after start time".to_string(),
            ));
        }

        if weekday_index(request.date) > LAST_BOOKABLE_WEEKDAY {
            return Err(SchedulingError::InvalidTime(
                "The clinic does not book appointments on Sundays".to_string(),
            ));
        }

        if request.repeat_weeks > MAX_REPEAT_WEEKS {
            return Err(SchedulingError::ValidationError(format!(
                "At most {} weekly repetitions are allowed",
                MAX_REPEAT_WEEKS
            )));
        }

        Ok(())
    }

    /// An absence left in a freed slot would clutter the calendar forever.
    /// Booking over it archives the absence row: hidden from the live view,
    /// still counted by the attendance reports.
    async fn archive_stale_absences(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?therapist_id=eq.{}&date=eq.{}&status=eq.absent&deleted=is.false",
            therapist_id, date
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let absences: Vec<Appointment> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| {
                SchedulingError::DatabaseError(format!("Failed to parse appointments: {}", e))
            })?;

        for absence in absences
            .iter()
            .filter(|a| crate::services::conflict::intervals_overlap(a.start_time, a.end_time, start, end))
        {
            warn!("Archiving stale absence {} occupying freed slot", absence.id);
            let path = format!("/rest/v1/appointments?id=eq.{}", absence.id);
            let update = json!({
                "deleted": true,
                "updated_at": Utc::now().to_rfc3339()
            });
            let _: Vec<Value> = self
                .supabase
                .request_with_headers(
                    Method::PATCH,
                    &path,
                    Some(auth_token),
                    Some(update),
                    Some(representation_headers()),
                )
                .await
                .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;
        }

        Ok(())
    }
}

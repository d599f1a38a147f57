// libs/scheduling-cell/src/services/replacement.rs
use chrono::{NaiveDateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{representation_headers, SupabaseClient};

use crate::models::{
    Appointment, AppointmentStatus, ReplacementPolicy, ReplacementRequest, SchedulingError,
};
use crate::services::booking::{fetch_patient, insert_appointment, NewAppointmentRecord};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::slot_lock::SlotLockService;

/// The reposição workflow: one logical swap made of two writes. The
/// vacating patient's row is marked absent and archived so attendance
/// statistics keep counting it; the substitute gets a brand-new Awaiting
/// row in the identical slot.
pub struct ReplacementService {
    supabase: Arc<SupabaseClient>,
    conflict_service: ConflictDetectionService,
    lock_service: SlotLockService,
    lifecycle_service: AppointmentLifecycleService,
    policy: ReplacementPolicy,
}

impl ReplacementService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_policy(config, ReplacementPolicy::default())
    }

    pub fn with_policy(config: &AppConfig, policy: ReplacementPolicy) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let conflict_service = ConflictDetectionService::new(Arc::clone(&supabase));
        let lock_service = SlotLockService::new(Arc::clone(&supabase));

        Self {
            conflict_service,
            lock_service,
            lifecycle_service: AppointmentLifecycleService::new(),
            policy,
            supabase,
        }
    }

    pub async fn replace(
        &self,
        appointment_id: Uuid,
        request: ReplacementRequest,
        now: NaiveDateTime,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        info!(
            "Replacement requested for appointment {} with substitute {}",
            appointment_id, request.substitute_patient_id
        );

        let original = self.get_appointment(appointment_id, auth_token).await?;

        // An archived row is only ever reachable here through the replay of
        // a replacement, and those are always absences. Anything else means
        // the stored state is corrupt; failing loudly beats skewing the
        // attendance statistics.
        if original.deleted && original.status != AppointmentStatus::Absent {
            return Err(SchedulingError::InvariantViolation(format!(
                "Archived appointment {} has status {} but no recorded absence",
                original.id, original.status
            )));
        }

        if original.status == AppointmentStatus::Done {
            return Err(SchedulingError::NotReplaceable(
                "Concluded appointments cannot be replaced".to_string(),
            ));
        }
        if !self.lifecycle_service.is_replaceable(self.policy, &original, now) {
            return Err(SchedulingError::NotReplaceable(
                "The slot is no longer eligible for replacement".to_string(),
            ));
        }

        // A row already absent carries its justification from when it was
        // marked; demanding a second one would double-record the absence.
        let already_absent = original.status == AppointmentStatus::Absent;
        if !already_absent && request.absence_reason.is_none() {
            return Err(SchedulingError::AbsenceReasonRequired);
        }

        let substitute_patient =
            fetch_patient(&self.supabase, request.substitute_patient_id, auth_token).await?;

        let lock = self
            .lock_service
            .acquire(original.therapist_id, original.date, original.start_time, auth_token)
            .await?;

        let result = self
            .perform_swap(&original, &request, already_absent, &substitute_patient, auth_token)
            .await;

        self.lock_service.release(&lock, auth_token).await?;
        result
    }

    async fn perform_swap(
        &self,
        original: &Appointment,
        request: &ReplacementRequest,
        already_absent: bool,
        substitute_patient: &patient_cell::models::Patient,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        self.archive_original(original, request, already_absent, auth_token).await?;

        // With the original archived the slot must be genuinely free; a
        // prior replacement's substitute still occupies it, for example.
        let blocked = match self
            .conflict_service
            .has_conflict(
                original.therapist_id,
                original.date,
                original.start_time,
                original.end_time,
                None,
                auth_token,
            )
            .await
        {
            Ok(blocked) => blocked,
            Err(e) => {
                self.restore_original(original, auth_token).await;
                return Err(e);
            }
        };
        if blocked {
            self.restore_original(original, auth_token).await;
            return Err(SchedulingError::ConflictDetected);
        }

        let substitute = insert_appointment(
            &self.supabase,
            NewAppointmentRecord {
                patient_id: substitute_patient.id,
                therapist_id: original.therapist_id,
                room_id: original.room_id,
                recurring_slot_id: None,
                date: original.date,
                start_time: original.start_time,
                end_time: original.end_time,
                billing_type: substitute_patient.default_billing_type,
                modality: original.modality,
            },
            auth_token,
        )
        .await;

        match substitute {
            Ok(appointment) => {
                info!(
                    "Appointment {} replaced by {} for patient {}",
                    original.id, appointment.id, appointment.patient_id
                );
                Ok(appointment)
            }
            Err(e) => {
                // Half a swap is worse than no swap: put the original back
                // before surfacing the failure.
                error!("Substitute creation failed, rolling back original {}", original.id);
                self.restore_original(original, auth_token).await;
                Err(e)
            }
        }
    }

    async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
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

    async fn archive_original(
        &self,
        original: &Appointment,
        request: &ReplacementRequest,
        already_absent: bool,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let update = if already_absent {
            json!({
                "deleted": true,
                "updated_at": Utc::now().to_rfc3339()
            })
        } else {
            json!({
                "status": AppointmentStatus::Absent,
                "absence_reason": request.absence_reason,
                "absence_note": request.absence_note,
                "deleted": true,
                "updated_at": Utc::now().to_rfc3339()
            })
        };

        let path = format!("/rest/v1/appointments?id=eq.{}", original.id);
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
        Ok(())
    }

    /// Compensation for a failed swap. Best effort: if this also fails the
    /// error is logged and the original error still propagates.
    async fn restore_original(&self, original: &Appointment, auth_token: &str) {
        let update = json!({
            "status": original.status,
            "absence_reason": original.absence_reason,
            "absence_note": original.absence_note,
            "deleted": original.deleted,
            "updated_at": Utc::now().to_rfc3339()
        });

        let path = format!("/rest/v1/appointments?id=eq.{}", original.id);
        let rollback: Result<Vec<Value>, _> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update),
                Some(representation_headers()),
            )
            .await;

        if let Err(e) = rollback {
            warn!("Rollback of appointment {} failed: {}", original.id, e);
        }
    }
}

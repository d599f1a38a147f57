// libs/scheduling-cell/src/services/materializer.rs
use chrono::{Duration, NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{representation_headers, SupabaseClient};

use crate::models::{
    default_end_time, weekday_index, Appointment, CreateSlotRequest, MaterializeOutcome,
    ReconcileOutcome, RecurringSlot, SchedulingError, UpdateSlotRequest, DEFAULT_HORIZON_DAYS,
    LAST_BOOKABLE_WEEKDAY,
};
use crate::services::booking::{
    fetch_patient, insert_appointment, verify_therapist_exists, NewAppointmentRecord,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::slot_lock::SlotLockService;

/// Expands active recurring slots into concrete appointment rows over a
/// bounded forward window, and keeps previously materialized rows in step
/// when a template is edited or retired.
pub struct MaterializerService {
    supabase: Arc<SupabaseClient>,
    conflict_service: ConflictDetectionService,
    lock_service: SlotLockService,
}

impl MaterializerService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let conflict_service = ConflictDetectionService::new(Arc::clone(&supabase));
        let lock_service = SlotLockService::new(Arc::clone(&supabase));

        Self {
            conflict_service,
            lock_service,
            supabase,
        }
    }

    pub async fn create_slot(
        &self,
        request: CreateSlotRequest,
        today: NaiveDate,
        auth_token: &str,
    ) -> Result<RecurringSlot, SchedulingError> {
        validate_weekday(request.weekday)?;

        let end_time = request.end_time.unwrap_or_else(|| default_end_time(request.start_time));
        if end_time <= request.start_time {
            return Err(SchedulingError::InvalidTime(
                "End time must be after start time".to_string(),
            ));
        }

        let effective_from = request.effective_from.unwrap_or(today);
        if let Some(until) = request.effective_until {
            if until < effective_from {
                return Err(SchedulingError::ValidationError(
                    "Effective-until cannot precede effective-from".to_string(),
                ));
            }
        }

        fetch_patient(&self.supabase, request.patient_id, auth_token).await?;
        verify_therapist_exists(&self.supabase, request.therapist_id, auth_token).await?;

        let now = Utc::now();
        let slot_data = json!({
            "id": Uuid::new_v4(),
            "therapist_id": request.therapist_id,
            "patient_id": request.patient_id,
            "room_id": request.room_id,
            "modality": request.modality,
            "weekday": request.weekday,
            "start_time": request.start_time,
            "end_time": end_time,
            "active": true,
            "effective_from": effective_from,
            "effective_until": request.effective_until,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/recurring_slots",
                Some(auth_token),
                Some(slot_data),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let slot: RecurringSlot = parse_slot_row(result)?;
        info!("Recurring slot {} created for therapist {}", slot.id, slot.therapist_id);
        Ok(slot)
    }

    pub async fn get_slot(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<RecurringSlot, SchedulingError> {
        let path = format!("/rest/v1/recurring_slots?id=eq.{}", slot_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(SchedulingError::SlotNotFound);
        }
        serde_json::from_value(result[0].clone())
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse slot: {}", e)))
    }

    /// Expand templates into dated appointments. Idempotent: a date whose
    /// (therapist, date, start) triple already has a row — live or
    /// historical — is never filled twice, so re-running is always safe.
    pub async fn materialize(
        &self,
        horizon_days: Option<i64>,
        slot_id: Option<Uuid>,
        today: NaiveDate,
        auth_token: &str,
    ) -> Result<MaterializeOutcome, SchedulingError> {
        let horizon = horizon_days.unwrap_or(DEFAULT_HORIZON_DAYS);

        let slots = match slot_id {
            Some(id) => vec![self.get_slot(id, auth_token).await?],
            None => self.fetch_active_slots(auth_token).await?,
        };

        let mut created = 0u32;
        for slot in slots.iter().filter(|s| s.active) {
            created += self.materialize_slot(slot, horizon, today, auth_token).await?;
        }

        info!("Materialization created {} appointments", created);
        Ok(MaterializeOutcome { created })
    }

    /// Re-align previously materialized future rows after a template edit.
    /// A weekday move invalidates them wholesale; a shortened end date cuts
    /// the tail; a time/room/therapist change is applied in place. Any
    /// dates the edit opened up are backfilled by a fresh materialization.
    pub async fn reconcile_slot_edit(
        &self,
        slot_id: Uuid,
        old_weekday: i32,
        old_effective_until: Option<NaiveDate>,
        today: NaiveDate,
        auth_token: &str,
    ) -> Result<ReconcileOutcome, SchedulingError> {
        let slot = self.get_slot(slot_id, auth_token).await?;
        let mut outcome = ReconcileOutcome { updated: 0, deleted: 0, created: 0 };

        if slot.weekday != old_weekday {
            // No future instance corresponds to a valid recurrence anymore.
            outcome.deleted = self
                .delete_future_awaiting(slot_id, today, None, auth_token)
                .await?;
            outcome.created = self
                .materialize_slot(&slot, DEFAULT_HORIZON_DAYS, today, auth_token)
                .await?;
            return Ok(outcome);
        }

        let until_shortened = match (old_effective_until, slot.effective_until) {
            (Some(old), Some(new)) => new < old,
            (None, Some(_)) => true,
            _ => false,
        };
        if until_shortened {
            if let Some(new_until) = slot.effective_until {
                outcome.deleted = self
                    .delete_future_awaiting(slot_id, today, Some(new_until), auth_token)
                    .await?;
            }
        }

        outcome.updated = self.realign_future_awaiting(&slot, today, auth_token).await?;
        outcome.created += self
            .materialize_slot(&slot, DEFAULT_HORIZON_DAYS, today, auth_token)
            .await?;

        Ok(outcome)
    }

    pub async fn update_slot(
        &self,
        slot_id: Uuid,
        request: UpdateSlotRequest,
        today: NaiveDate,
        auth_token: &str,
    ) -> Result<(RecurringSlot, ReconcileOutcome), SchedulingError> {
        let current = self.get_slot(slot_id, auth_token).await?;
        let old_weekday = current.weekday;
        let old_effective_until = current.effective_until;

        let mut update_data = serde_json::Map::new();
        if let Some(therapist_id) = request.therapist_id {
            verify_therapist_exists(&self.supabase, therapist_id, auth_token).await?;
            update_data.insert("therapist_id".to_string(), json!(therapist_id));
        }
        if let Some(room_id) = request.room_id {
            update_data.insert("room_id".to_string(), json!(room_id));
        }
        if let Some(modality) = request.modality {
            update_data.insert("modality".to_string(), json!(modality));
        }
        if let Some(weekday) = request.weekday {
            validate_weekday(weekday)?;
            update_data.insert("weekday".to_string(), json!(weekday));
        }

        let new_start = request.start_time.unwrap_or(current.start_time);
        let new_end = request.end_time.unwrap_or(current.end_time);
        if new_end <= new_start {
            return Err(SchedulingError::InvalidTime(
                "End time must be after start time".to_string(),
            ));
        }
        if let Some(start_time) = request.start_time {
            update_data.insert("start_time".to_string(), json!(start_time));
        }
        if let Some(end_time) = request.end_time {
            update_data.insert("end_time".to_string(), json!(end_time));
        }
        if let Some(effective_until) = request.effective_until {
            if effective_until < current.effective_from {
                return Err(SchedulingError::ValidationError(
                    "Effective-until cannot precede effective-from".to_string(),
                ));
            }
            update_data.insert("effective_until".to_string(), json!(effective_until));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/recurring_slots?id=eq.{}", slot_id);
        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update_data)),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;
        let updated_slot: RecurringSlot = parse_slot_row(result)?;

        let outcome = self
            .reconcile_slot_edit(slot_id, old_weekday, old_effective_until, today, auth_token)
            .await?;

        Ok((updated_slot, outcome))
    }

    /// Retire a template. Already materialized future rows are only swept
    /// when the caller opts in; deactivation by itself never touches the
    /// calendar.
    pub async fn deactivate_slot(
        &self,
        slot_id: Uuid,
        cleanup_future: bool,
        today: NaiveDate,
        auth_token: &str,
    ) -> Result<ReconcileOutcome, SchedulingError> {
        self.get_slot(slot_id, auth_token).await?;

        let path = format!("/rest/v1/recurring_slots?id=eq.{}", slot_id);
        let update = json!({
            "active": false,
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

        let mut outcome = ReconcileOutcome { updated: 0, deleted: 0, created: 0 };
        if cleanup_future {
            let path = format!(
                "/rest/v1/appointments?recurring_slot_id=eq.{}&status=eq.awaiting&deleted=is.false&date=gt.{}",
                slot_id, today
            );
            let update = json!({
                "deleted": true,
                "updated_at": Utc::now().to_rfc3339()
            });
            let rows: Vec<Value> = self
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
            outcome.deleted = rows.len() as u32;
        }

        info!("Recurring slot {} deactivated ({} rows swept)", slot_id, outcome.deleted);
        Ok(outcome)
    }

    // ==========================================================================
    // PRIVATE HELPERS
    // ==========================================================================

    async fn fetch_active_slots(
        &self,
        auth_token: &str,
    ) -> Result<Vec<RecurringSlot>, SchedulingError> {
        let path = "/rest/v1/recurring_slots?active=is.true&order=weekday.asc,start_time.asc";
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<RecurringSlot>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse slots: {}", e)))
    }

    async fn materialize_slot(
        &self,
        slot: &RecurringSlot,
        horizon_days: i64,
        today: NaiveDate,
        auth_token: &str,
    ) -> Result<u32, SchedulingError> {
        let window_start = slot.effective_from.max(today);
        let horizon_end = today + Duration::days(horizon_days);
        let window_end = match slot.effective_until {
            Some(until) => until.min(horizon_end),
            None => horizon_end,
        };

        if window_end < window_start {
            return Ok(0);
        }

        debug!(
            "Materializing slot {} over [{}, {}]",
            slot.id, window_start, window_end
        );

        let patient = fetch_patient(&self.supabase, slot.patient_id, auth_token).await?;

        let mut created = 0u32;
        let mut date = window_start;
        while date <= window_end {
            if weekday_index(date) != slot.weekday {
                date = date + Duration::days(1);
                continue;
            }

            // Idempotence by (therapist, date, start): a row for this exact
            // triple — even a soft-deleted one — means the date is spoken
            // for. A cleared day therefore stays cleared across re-runs.
            if self
                .appointment_exists_at(slot.therapist_id, date, slot, auth_token)
                .await?
            {
                date = date + Duration::days(1);
                continue;
            }

            let blocked = self
                .conflict_service
                .has_conflict(
                    slot.therapist_id,
                    date,
                    slot.start_time,
                    slot.end_time,
                    None,
                    auth_token,
                )
                .await?;
            if blocked {
                debug!("Skipping {}: slot blocked by existing booking", date);
                date = date + Duration::days(1);
                continue;
            }

            let lock = match self
                .lock_service
                .acquire(slot.therapist_id, date, slot.start_time, auth_token)
                .await
            {
                Ok(lock) => lock,
                Err(SchedulingError::ConflictDetected) => {
                    warn!("Lock contention while materializing {} on {}", slot.id, date);
                    date = date + Duration::days(1);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let inserted = insert_appointment(
                &self.supabase,
                NewAppointmentRecord {
                    patient_id: slot.patient_id,
                    therapist_id: slot.therapist_id,
                    room_id: slot.room_id,
                    recurring_slot_id: Some(slot.id),
                    date,
                    start_time: slot.start_time,
                    end_time: slot.end_time,
                    billing_type: patient.default_billing_type,
                    modality: slot.modality,
                },
                auth_token,
            )
            .await;

            self.lock_service.release(&lock, auth_token).await?;
            inserted?;
            created += 1;

            date = date + Duration::days(1);
        }

        Ok(created)
    }

    async fn appointment_exists_at(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        slot: &RecurringSlot,
        auth_token: &str,
    ) -> Result<bool, SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?therapist_id=eq.{}&date=eq.{}&start_time=eq.{}&limit=1",
            therapist_id, date, slot.start_time
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        Ok(!result.is_empty())
    }

    async fn delete_future_awaiting(
        &self,
        slot_id: Uuid,
        today: NaiveDate,
        after: Option<NaiveDate>,
        auth_token: &str,
    ) -> Result<u32, SchedulingError> {
        let boundary = after.unwrap_or(today).max(today);
        let path = format!(
            "/rest/v1/appointments?recurring_slot_id=eq.{}&status=eq.awaiting&deleted=is.false&date=gt.{}",
            slot_id, boundary
        );

        let rows: Vec<Value> = self
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

        Ok(rows.len() as u32)
    }

    /// Bring future Awaiting rows generated by this slot back in line with
    /// the template's current time, room and therapist. Only drifted rows
    /// are touched.
    async fn realign_future_awaiting(
        &self,
        slot: &RecurringSlot,
        today: NaiveDate,
        auth_token: &str,
    ) -> Result<u32, SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?recurring_slot_id=eq.{}&status=eq.awaiting&deleted=is.false&date=gt.{}",
            slot.id, today
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let linked: Vec<Appointment> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| {
                SchedulingError::DatabaseError(format!("Failed to parse appointments: {}", e))
            })?;

        let mut updated = 0u32;
        for appointment in linked.iter().filter(|a| {
            a.start_time != slot.start_time
                || a.end_time != slot.end_time
                || a.room_id != slot.room_id
                || a.therapist_id != slot.therapist_id
        }) {
            let path = format!("/rest/v1/appointments?id=eq.{}", appointment.id);
            let update = json!({
                "therapist_id": slot.therapist_id,
                "room_id": slot.room_id,
                "start_time": slot.start_time,
                "end_time": slot.end_time,
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
            updated += 1;
        }

        Ok(updated)
    }
}

fn validate_weekday(weekday: i32) -> Result<(), SchedulingError> {
    if !(0..=6).contains(&weekday) {
        return Err(SchedulingError::ValidationError(
            "Weekday must be between 0 (Monday) and 6 (Sunday)".to_string(),
        ));
    }
    if weekday > LAST_BOOKABLE_WEEKDAY {
        return Err(SchedulingError::InvalidTime(
            "The clinic does not operate on Sundays".to_string(),
        ));
    }
    Ok(())
}

fn parse_slot_row(result: Vec<Value>) -> Result<RecurringSlot, SchedulingError> {
    let row = result
        .into_iter()
        .next()
        .ok_or_else(|| SchedulingError::DatabaseError("Write returned no rows".to_string()))?;
    serde_json::from_value(row)
        .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse slot: {}", e)))
}

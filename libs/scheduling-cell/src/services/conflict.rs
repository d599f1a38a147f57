use chrono::{NaiveDate, NaiveTime};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, SchedulingError};

/// The one overlap predicate in the system. Batch creation, materialization,
/// replacement and edits all decide "is this slot free?" through here;
/// nothing else is allowed to re-derive the rule.
pub struct ConflictDetectionService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictDetectionService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// All active, non-absent appointments of the therapist on `date` that
    /// overlap `[start, end)`. Absences never block: the historical row
    /// stays, but the slot is logically vacant. Soft-deleted rows never
    /// block either.
    pub async fn find_conflicts(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        debug!(
            "Checking conflicts for therapist {} on {} from {} to {}",
            therapist_id, date, start, end
        );

        let mut query_parts = vec![
            format!("therapist_id=eq.{}", therapist_id),
            format!("date=eq.{}", date),
            "deleted=is.false".to_string(),
            "status=neq.absent".to_string(),
        ];

        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!(
            "/rest/v1/appointments?{}&order=start_time.asc",
            query_parts.join("&")
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let appointments: Vec<Appointment> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| {
                SchedulingError::DatabaseError(format!("Failed to parse appointments: {}", e))
            })?;

        let conflicting: Vec<Appointment> = appointments
            .into_iter()
            .filter(|apt| intervals_overlap(apt.start_time, apt.end_time, start, end))
            .collect();

        if !conflicting.is_empty() {
            warn!(
                "Conflict detected for therapist {} on {}: {} overlapping appointments",
                therapist_id,
                date,
                conflicting.len()
            );
        }

        Ok(conflicting)
    }

    pub async fn has_conflict(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<bool, SchedulingError> {
        let conflicts = self
            .find_conflicts(therapist_id, date, start, end, exclude_appointment_id, auth_token)
            .await?;
        Ok(!conflicts.is_empty())
    }
}

/// Half-open interval rule: touching endpoints do not conflict, so a
/// 10:00-10:45 session and a 10:45-11:30 session coexist.
pub(crate) fn intervals_overlap(
    start1: NaiveTime,
    end1: NaiveTime,
    start2: NaiveTime,
    end2: NaiveTime,
) -> bool {
    start1 < end2 && start2 < end1
}

// libs/scheduling-cell/src/services/cleanup.rs
use chrono::{NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{representation_headers, SupabaseClient};

use crate::models::SchedulingError;

/// Bulk soft-deletes over the live calendar. Concluded appointments are
/// never swept: clinical history survives every cleanup. The scoping
/// (`deleted=is.false`) is the same active set the conflict detector reads,
/// so a cleared slot is immediately bookable again.
pub struct CleanupService {
    supabase: Arc<SupabaseClient>,
}

impl CleanupService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    /// Clear one day's calendar, optionally for a single therapist.
    pub async fn clear_day(
        &self,
        date: NaiveDate,
        therapist_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<u32, SchedulingError> {
        let mut query_parts = vec![
            format!("date=eq.{}", date),
            "deleted=is.false".to_string(),
            "status=neq.done".to_string(),
        ];
        if let Some(therapist_id) = therapist_id {
            query_parts.push(format!("therapist_id=eq.{}", therapist_id));
        }

        let count = self.soft_delete_where(&query_parts.join("&"), auth_token).await?;
        info!("Day {} cleared: {} appointments archived", date, count);
        Ok(count)
    }

    /// Sweep a departing patient's remaining bookings. A therapist scope
    /// limits the sweep to that therapist's own calendar.
    pub async fn clear_patient_future(
        &self,
        patient_id: Uuid,
        therapist_scope: Option<Uuid>,
        today: NaiveDate,
        now_time: NaiveTime,
        auth_token: &str,
    ) -> Result<u32, SchedulingError> {
        let mut filter = format!(
            "patient_id=eq.{}&{}",
            patient_id,
            future_filter(today, now_time)
        );
        if let Some(therapist_id) = therapist_scope {
            filter.push_str(&format!("&therapist_id=eq.{}", therapist_id));
        }
        let count = self.soft_delete_where(&filter, auth_token).await?;
        info!("Cleared {} future appointments of patient {}", count, patient_id);
        Ok(count)
    }

    /// Sweep a therapist's remaining calendar (leave of absence, departure).
    pub async fn clear_therapist_future(
        &self,
        therapist_id: Uuid,
        today: NaiveDate,
        now_time: NaiveTime,
        auth_token: &str,
    ) -> Result<u32, SchedulingError> {
        let filter = format!(
            "therapist_id=eq.{}&{}",
            therapist_id,
            future_filter(today, now_time)
        );
        let count = self.soft_delete_where(&filter, auth_token).await?;
        info!("Cleared {} future appointments of therapist {}", count, therapist_id);
        Ok(count)
    }

    async fn soft_delete_where(
        &self,
        filter: &str,
        auth_token: &str,
    ) -> Result<u32, SchedulingError> {
        let path = format!("/rest/v1/appointments?{}", filter);
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

        Ok(rows.len() as u32)
    }
}

/// Strictly-future scoping: later dates, or later start times today.
fn future_filter(today: NaiveDate, now_time: NaiveTime) -> String {
    format!(
        "deleted=is.false&status=neq.done&or=(date.gt.{},and(date.eq.{},start_time.gt.{}))",
        today, today, now_time
    )
}

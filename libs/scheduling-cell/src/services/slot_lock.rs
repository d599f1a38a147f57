use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::{representation_headers, SupabaseClient};

use crate::models::SchedulingError;

/// Short-lived lock row taken around every check-then-create sequence.
/// Two staff members racing for the same therapist slot both pass the
/// read-side conflict check; the unique `lock_key` makes the second insert
/// fail, so only one of them gets to create the appointment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotLock {
    pub id: Uuid,
    pub lock_key: String,
    pub therapist_id: Uuid,
    pub acquired_at: chrono::DateTime<Utc>,
    pub expires_at: chrono::DateTime<Utc>,
    pub process_id: String,
}

pub struct SlotLockService {
    supabase: Arc<SupabaseClient>,
    lock_timeout_seconds: i64,
}

impl SlotLockService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            supabase,
            lock_timeout_seconds: 30,
        }
    }

    fn lock_key(therapist_id: Uuid, date: NaiveDate, start: NaiveTime) -> String {
        format!("slot:{}:{}:{}", therapist_id, date, start)
    }

    /// Try to take the lock for one concrete slot. Returns the lock row on
    /// success; `ConflictDetected` when another writer holds it.
    pub async fn acquire(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        auth_token: &str,
    ) -> Result<SlotLock, SchedulingError> {
        let key = Self::lock_key(therapist_id, date, start);
        debug!("Acquiring scheduling lock {}", key);

        // Stale locks from crashed writers must not wedge the slot forever.
        self.purge_expired(&key, auth_token).await?;

        let now = Utc::now();
        let lock_data = json!({
            "id": Uuid::new_v4(),
            "lock_key": key,
            "therapist_id": therapist_id,
            "acquired_at": now.to_rfc3339(),
            "expires_at": (now + Duration::seconds(self.lock_timeout_seconds)).to_rfc3339(),
            "process_id": format!("scheduler_{}", Uuid::new_v4()),
        });

        let result: Result<Vec<Value>, _> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/scheduling_locks",
                Some(auth_token),
                Some(lock_data),
                Some(representation_headers()),
            )
            .await;

        match result {
            Ok(rows) => {
                let row = rows.into_iter().next().ok_or_else(|| {
                    SchedulingError::DatabaseError("Lock insert returned no rows".to_string())
                })?;
                serde_json::from_value(row).map_err(|e| {
                    SchedulingError::DatabaseError(format!("Failed to parse lock: {}", e))
                })
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("Conflict") || message.contains("duplicate") {
                    warn!("Lock contention on {}", key);
                    Err(SchedulingError::ConflictDetected)
                } else {
                    Err(SchedulingError::DatabaseError(message))
                }
            }
        }
    }

    pub async fn release(&self, lock: &SlotLock, auth_token: &str) -> Result<(), SchedulingError> {
        let path = format!("/rest/v1/scheduling_locks?id=eq.{}", lock.id);
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
        Ok(())
    }

    async fn purge_expired(&self, lock_key: &str, auth_token: &str) -> Result<(), SchedulingError> {
        // RFC3339 offsets carry a '+', which must not reach the query string raw.
        let cutoff = urlencoding::encode(&Utc::now().to_rfc3339()).into_owned();
        let path = format!(
            "/rest/v1/scheduling_locks?lock_key=eq.{}&expires_at=lt.{}",
            lock_key, cutoff
        );
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
        Ok(())
    }
}

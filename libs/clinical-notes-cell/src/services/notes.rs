use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use scheduling_cell::models::{Appointment, AppointmentStatus};
use scheduling_cell::services::lifecycle::AppointmentLifecycleService;
use shared_config::AppConfig;
use shared_database::supabase::{representation_headers, SupabaseClient};

use crate::models::{
    Attachment, ClinicalNote, NoteError, RegisterAttachmentRequest, MAX_ATTACHMENT_BYTES,
};

pub struct ClinicalNoteService {
    supabase: Arc<SupabaseClient>,
    lifecycle_service: AppointmentLifecycleService,
}

impl ClinicalNoteService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            lifecycle_service: AppointmentLifecycleService::new(),
        }
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, NoteError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| NoteError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(NoteError::AppointmentNotFound)?;
        serde_json::from_value(row)
            .map_err(|e| NoteError::DatabaseError(format!("Failed to parse appointment: {}", e)))
    }

    pub async fn get_note(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<ClinicalNote, NoteError> {
        let path = format!("/rest/v1/clinical_notes?appointment_id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| NoteError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(NoteError::NotFound)?;
        serde_json::from_value(row)
            .map_err(|e| NoteError::DatabaseError(format!("Failed to parse note: {}", e)))
    }

    /// Write the clinical narrative for a session. First save concludes the
    /// appointment (Awaiting becomes Done); later saves only edit the text.
    pub async fn save_note(
        &self,
        appointment_id: Uuid,
        content: &str,
        auth_token: &str,
    ) -> Result<ClinicalNote, NoteError> {
        if content.trim().is_empty() {
            return Err(NoteError::ValidationError("Note content is required".to_string()));
        }

        let appointment = self.get_appointment(appointment_id, auth_token).await?;
        if appointment.deleted {
            return Err(NoteError::AppointmentNotEligible(
                "Archived appointments cannot carry notes".to_string(),
            ));
        }

        if appointment.status != AppointmentStatus::Done {
            // Saving the narrative is what concludes the session.
            self.lifecycle_service
                .validate_status_transition(&appointment.status, &AppointmentStatus::Done)
                .map_err(|e| NoteError::AppointmentNotEligible(e.to_string()))?;
            self.conclude_appointment(appointment_id, auth_token).await?;
        }

        let note = match self.get_note(appointment_id, auth_token).await {
            Ok(_) => self.update_note_content(appointment_id, content, auth_token).await?,
            Err(NoteError::NotFound) => self.insert_note(appointment_id, content, auth_token).await?,
            Err(e) => return Err(e),
        };

        info!("Clinical note saved for appointment {}", appointment_id);
        Ok(note)
    }

    /// Record an uploaded file against a note. The byte transport lives in
    /// object storage; this only registers the reference and enforces the
    /// size cap.
    pub async fn register_attachment(
        &self,
        appointment_id: Uuid,
        request: RegisterAttachmentRequest,
        auth_token: &str,
    ) -> Result<Attachment, NoteError> {
        if request.size_bytes <= 0 {
            return Err(NoteError::ValidationError("Attachment size must be positive".to_string()));
        }
        if request.size_bytes > MAX_ATTACHMENT_BYTES {
            return Err(NoteError::AttachmentTooLarge);
        }

        // Attachments hang off an existing note.
        self.get_note(appointment_id, auth_token).await?;

        let attachment_id = Uuid::new_v4();
        let storage_path = format!(
            "clinical-notes/{}/{}_{}",
            appointment_id, attachment_id, request.file_name
        );

        let attachment_data = json!({
            "id": attachment_id,
            "appointment_id": appointment_id,
            "file_name": request.file_name,
            "storage_path": storage_path,
            "content_type": request.content_type,
            "size_bytes": request.size_bytes,
            "created_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/note_attachments",
                Some(auth_token),
                Some(attachment_data),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| NoteError::DatabaseError(e.to_string()))?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| NoteError::DatabaseError("Write returned no rows".to_string()))?;
        serde_json::from_value(row)
            .map_err(|e| NoteError::DatabaseError(format!("Failed to parse attachment: {}", e)))
    }

    pub async fn list_attachments(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Attachment>, NoteError> {
        let path = format!(
            "/rest/v1/note_attachments?appointment_id=eq.{}&order=created_at.asc",
            appointment_id
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| NoteError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Attachment>, _>>()
            .map_err(|e| NoteError::DatabaseError(format!("Failed to parse attachments: {}", e)))
    }

    async fn conclude_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), NoteError> {
        debug!("Concluding appointment {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let update = json!({
            "status": AppointmentStatus::Done,
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
            .map_err(|e| NoteError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn insert_note(
        &self,
        appointment_id: Uuid,
        content: &str,
        auth_token: &str,
    ) -> Result<ClinicalNote, NoteError> {
        let now = Utc::now();
        let note_data = json!({
            "appointment_id": appointment_id,
            "content": content,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/clinical_notes",
                Some(auth_token),
                Some(note_data),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| NoteError::DatabaseError(e.to_string()))?;

        parse_note_row(result)
    }

    /// Content is the only mutable field; `created_at` never changes.
    async fn update_note_content(
        &self,
        appointment_id: Uuid,
        content: &str,
        auth_token: &str,
    ) -> Result<ClinicalNote, NoteError> {
        let path = format!("/rest/v1/clinical_notes?appointment_id=eq.{}", appointment_id);
        let update = json!({
            "content": content,
            "updated_at": Utc::now().to_rfc3339()
        });

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
            .map_err(|e| NoteError::DatabaseError(e.to_string()))?;

        parse_note_row(result)
    }
}

fn parse_note_row(result: Vec<Value>) -> Result<ClinicalNote, NoteError> {
    let row = result
        .into_iter()
        .next()
        .ok_or_else(|| NoteError::DatabaseError("Write returned no rows".to_string()))?;
    serde_json::from_value(row)
        .map_err(|e| NoteError::DatabaseError(format!("Failed to parse note: {}", e)))
}

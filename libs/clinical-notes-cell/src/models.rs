use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Attachments are capped at 10 MB each.
pub const MAX_ATTACHMENT_BYTES: i64 = 10 * 1024 * 1024;

/// Free-text clinical narrative, one per concluded appointment. The
/// creation timestamp is immutable; only the content may be edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalNote {
    pub appointment_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub file_name: String,
    pub storage_path: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveNoteRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAttachmentRequest {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum NoteError {
    #[error("Clinical note not found")]
    NotFound,

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Appointment cannot carry a clinical note: {0}")]
    AppointmentNotEligible(String),

    #[error("Attachment exceeds the 10 MB limit")]
    AttachmentTooLarge,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    Psychology,
    Psychiatry,
    SpeechTherapy,
    OccupationalTherapy,
    Physiotherapy,
    Nutrition,
}

impl fmt::Display for Specialty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Specialty::Psychology => write!(f, "psychology"),
            Specialty::Psychiatry => write!(f, "psychiatry"),
            Specialty::SpeechTherapy => write!(f, "speech_therapy"),
            Specialty::OccupationalTherapy => write!(f, "occupational_therapy"),
            Specialty::Physiotherapy => write!(f, "physiotherapy"),
            Specialty::Nutrition => write!(f, "nutrition"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Therapist {
    pub id: Uuid,
    pub name: String,
    /// Professional registration (CRP/CRM).
    pub registration_number: Option<String>,
    pub specialty: Option<Specialty>,
    /// Login identity, at most one per therapist.
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTherapistRequest {
    pub name: String,
    pub registration_number: Option<String>,
    pub specialty: Option<Specialty>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTherapistRequest {
    pub name: Option<String>,
    pub registration_number: Option<String>,
    pub specialty: Option<Specialty>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TherapistSearchQuery {
    pub q: Option<String>,
    pub specialty: Option<Specialty>,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum TherapistError {
    #[error("Therapist not found")]
    NotFound,

    #[error("Room not found")]
    RoomNotFound,

    #[error("Therapist still has appointments and cannot be removed")]
    HasAppointments,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

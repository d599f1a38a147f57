use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How a session is billed. Snapshotted onto each appointment at creation
/// time from the patient's default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    Private,
    PrivateDiscount,
    Insurance,
    Social,
}

impl fmt::Display for BillingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingType::Private => write!(f, "private"),
            BillingType::PrivateDiscount => write!(f, "private_discount"),
            BillingType::Insurance => write!(f, "insurance"),
            BillingType::Social => write!(f, "social"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    /// National registry number; unique and exactly 11 digits when present.
    pub national_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
    /// 10-11 digits, area code plus number, no separators.
    pub phone: Option<String>,
    pub default_billing_type: BillingType,
    pub insurance_plan_id: Option<Uuid>,
    pub policy_number: Option<String>,
    pub active: bool,
    /// Accent-stripped, lower-cased form of `name`, recomputed on every
    /// write. All name lookups go through this column.
    pub search_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsurancePlan {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePatientRequest {
    pub name: String,
    pub national_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub phone: Option<String>,
    pub default_billing_type: BillingType,
    pub insurance_plan_id: Option<Uuid>,
    pub policy_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePatientRequest {
    pub name: Option<String>,
    pub national_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub phone: Option<String>,
    pub default_billing_type: Option<BillingType>,
    pub insurance_plan_id: Option<Uuid>,
    pub policy_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientSearchQuery {
    /// Name fragment (accent-insensitive) or national-id prefix.
    pub q: Option<String>,
    /// "active" (default), "inactive" or "all".
    pub status: Option<String>,
    pub billing_type: Option<BillingType>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum PatientError {
    #[error("Patient not found")]
    NotFound,

    #[error("A patient with national id {national_id} already exists")]
    NationalIdTaken { national_id: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Lower-case and strip the accents that occur in Portuguese names so that
/// lookups match regardless of how the name was typed.
pub fn normalize_search_key(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

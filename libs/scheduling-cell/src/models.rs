// libs/scheduling-cell/src/models.rs
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use patient_cell::models::BillingType;

// ==============================================================================
// DOMAIN CONSTANTS
// ==============================================================================

/// Standard session length. Appointments and recurring slots created
/// without an explicit end time get `start + 45min`.
pub const DEFAULT_SESSION_MINUTES: i64 = 45;

/// The clinic books Monday through Saturday; Sunday is closed.
pub const LAST_BOOKABLE_WEEKDAY: i32 = 5;

/// Cap on how many weekly repetitions a single batch request may ask for.
pub const MAX_REPEAT_WEEKS: u32 = 48;

/// Default forward window for expanding recurring slots into appointments.
pub const DEFAULT_HORIZON_DAYS: i64 = 365;

pub fn day_start() -> NaiveTime {
    NaiveTime::from_hms_opt(7, 15, 0).unwrap()
}

pub fn day_end() -> NaiveTime {
    NaiveTime::from_hms_opt(19, 30, 0).unwrap()
}

pub fn lunch_start() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 30, 0).unwrap()
}

pub fn lunch_end() -> NaiveTime {
    NaiveTime::from_hms_opt(13, 15, 0).unwrap()
}

pub fn default_end_time(start: NaiveTime) -> NaiveTime {
    start + Duration::minutes(DEFAULT_SESSION_MINUTES)
}

/// Valid 45-minute session starts across the operating day, skipping the
/// lunch break. Used by grid displays.
pub fn slot_grid() -> Vec<NaiveTime> {
    let mut slots = Vec::new();
    let mut current = day_start();

    loop {
        let end = current + Duration::minutes(DEFAULT_SESSION_MINUTES);
        if end > day_end() || end < current {
            break;
        }
        let in_lunch = current < lunch_end() && end > lunch_start();
        if !in_lunch {
            slots.push(current);
        }
        current = current + Duration::minutes(DEFAULT_SESSION_MINUTES);
    }

    slots
}

/// Weekday index used by recurring slots: 0 = Monday .. 6 = Sunday.
pub fn weekday_index(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_monday() as i32
}

// ==============================================================================
// CORE SCHEDULING MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Awaiting,
    Done,
    Absent,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Awaiting => write!(f, "awaiting"),
            AppointmentStatus::Done => write!(f, "done"),
            AppointmentStatus::Absent => write!(f, "absent"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AbsenceReason {
    Justified,
    Unjustified,
    InsuranceDenial,
    TherapistFault,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Individual,
    Couple,
    Family,
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub therapist_id: Uuid,
    pub room_id: Option<Uuid>,
    /// Back-reference to the recurring slot that generated this row.
    /// None means the appointment was booked ad hoc.
    pub recurring_slot_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Snapshot of the patient's default at creation time; the patient's
    /// default may change later without touching past bookings.
    pub billing_type: BillingType,
    #[serde(default)]
    pub modality: Option<Modality>,
    pub status: AppointmentStatus,
    pub absence_reason: Option<AbsenceReason>,
    pub absence_note: Option<String>,
    /// Soft delete: hidden from the live calendar, retained for history
    /// and statistics.
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn is_adhoc(&self) -> bool {
        self.recurring_slot_id.is_none()
    }
}

/// A standing weekly booking template, not itself a calendar event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringSlot {
    pub id: Uuid,
    pub therapist_id: Uuid,
    pub patient_id: Uuid,
    pub room_id: Option<Uuid>,
    pub modality: Option<Modality>,
    /// 0 = Monday .. 6 = Sunday. Sunday is rejected at creation.
    pub weekday: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub active: bool,
    pub effective_from: NaiveDate,
    pub effective_until: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBatchRequest {
    pub patient_id: Uuid,
    pub therapist_id: Uuid,
    pub room_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    /// 0 books only the base date.
    #[serde(default)]
    pub repeat_weeks: u32,
}

/// Conflicts are data, not errors: the batch books what it can and reports
/// the dates it could not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub created: u32,
    pub conflicts: Vec<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSlotRequest {
    pub therapist_id: Uuid,
    pub patient_id: Uuid,
    pub room_id: Option<Uuid>,
    pub modality: Option<Modality>,
    pub weekday: i32,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub effective_from: Option<NaiveDate>,
    pub effective_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSlotRequest {
    pub therapist_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub modality: Option<Modality>,
    pub weekday: Option<i32>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub effective_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializeOutcome {
    pub created: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub updated: u32,
    pub deleted: u32,
    pub created: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkAbsentRequest {
    pub reason: AbsenceReason,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacementRequest {
    pub substitute_patient_id: Uuid,
    pub absence_reason: Option<AbsenceReason>,
    pub absence_note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub therapist_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    /// History reads must opt in; the default is the live calendar view.
    #[serde(default)]
    pub include_deleted: bool,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

// ==============================================================================
// REPLACEMENT POLICY
// ==============================================================================

/// Which appointments are eligible for the replacement workflow. The rule
/// is configuration, not code scattered across call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementPolicy {
    /// The slot's start must still be ahead of the clock.
    FutureOnly,
    /// Any slot that has not been concluded (marked done) may be filled.
    UntilConcluded,
}

impl Default for ReplacementPolicy {
    fn default() -> Self {
        ReplacementPolicy::FutureOnly
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum SchedulingError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Therapist not found")]
    TherapistNotFound,

    #[error("Recurring slot not found")]
    SlotNotFound,

    #[error("Time slot conflicts with an existing booking")]
    ConflictDetected,

    #[error("Invalid appointment time: {0}")]
    InvalidTime(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Appointment cannot change status from {0}")]
    InvalidStatusTransition(AppointmentStatus),

    #[error("An absence reason is required")]
    AbsenceReasonRequired,

    #[error("Appointment is not eligible for replacement: {0}")]
    NotReplaceable(String),

    /// A state that should be impossible; aborts the operation loudly
    /// instead of corrupting statistics.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

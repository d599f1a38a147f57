use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use patient_cell::models::BillingType;

#[derive(Debug, Clone, Deserialize)]
pub struct AttendanceReportQuery {
    pub month: u32,
    pub year: i32,
    /// Zero-based week index inside the month; omitted means the whole month.
    pub week: Option<u32>,
    pub therapist_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceTotals {
    /// Concluded plus missed sessions; rows still awaiting never count.
    pub scheduled: u32,
    pub done: u32,
    pub absent: u32,
    pub absence_rate_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TherapistAttendanceRow {
    pub therapist_id: Uuid,
    pub done: u32,
    pub absent: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceReport {
    pub totals: AttendanceTotals,
    pub per_therapist: Vec<TherapistAttendanceRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingOrder {
    RateDesc,
    RateAsc,
    AbsencesDesc,
    AttendancesDesc,
}

impl Default for RankingOrder {
    fn default() -> Self {
        RankingOrder::RateDesc
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatientAbsenceQuery {
    pub month: u32,
    pub year: i32,
    pub billing_type: Option<BillingType>,
    #[serde(default)]
    pub order: RankingOrder,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientAbsenceRow {
    pub patient_id: Uuid,
    pub scheduled: u32,
    pub done: u32,
    pub absent: u32,
    pub absence_rate_pct: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OccupancyQuery {
    /// Any date in the desired week; the grid is aligned to its Monday.
    pub week_of: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotOccupancy {
    pub start: NaiveTime,
    pub occupied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayOccupancy {
    pub date: NaiveDate,
    pub slots: Vec<SlotOccupancy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomOccupancy {
    pub room_id: Uuid,
    pub room_name: String,
    pub days: Vec<DayOccupancy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OccupancyGrid {
    pub week_start: NaiveDate,
    pub rooms: Vec<RoomOccupancy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum ReportError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

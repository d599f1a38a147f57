// libs/reporting-cell/src/services/reports.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use scheduling_cell::models::{slot_grid, Appointment, AppointmentStatus, DEFAULT_SESSION_MINUTES};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use therapist_cell::models::Room;

use crate::models::{
    AttendanceReport, AttendanceReportQuery, AttendanceTotals, DayOccupancy, OccupancyGrid,
    PatientAbsenceQuery, PatientAbsenceRow, RankingOrder, ReportError, RoomOccupancy,
    SlotOccupancy, TherapistAttendanceRow,
};

/// Read-only rollups over the appointment history. No scheduling logic
/// lives here; the aggregation is done in memory over fetched rows.
pub struct ReportingService {
    supabase: Arc<SupabaseClient>,
}

impl ReportingService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    /// Attendance rollup for one month, optionally narrowed to a week of
    /// that month or to a single therapist.
    pub async fn monthly_attendance(
        &self,
        query: AttendanceReportQuery,
        auth_token: &str,
    ) -> Result<AttendanceReport, ReportError> {
        let (month_start, month_end) = month_bounds(query.year, query.month)?;
        let (from, to) = match query.week {
            Some(week) => week_bounds(month_start, week),
            None => (month_start, month_end),
        };

        debug!("Attendance report for [{}, {}]", from, to);

        let rows = self
            .fetch_statistics_rows(from, to, query.therapist_id, None, auth_token)
            .await?;

        let mut done = 0u32;
        let mut absent = 0u32;
        let mut per_therapist: BTreeMap<Uuid, (u32, u32)> = BTreeMap::new();

        for row in &rows {
            let entry = per_therapist.entry(row.therapist_id).or_default();
            match row.status {
                AppointmentStatus::Done => {
                    done += 1;
                    entry.0 += 1;
                }
                AppointmentStatus::Absent => {
                    absent += 1;
                    entry.1 += 1;
                }
                AppointmentStatus::Awaiting => {}
            }
        }

        let scheduled = done + absent;
        let mut per_therapist: Vec<TherapistAttendanceRow> = per_therapist
            .into_iter()
            .map(|(therapist_id, (done, absent))| TherapistAttendanceRow {
                therapist_id,
                done,
                absent,
            })
            .collect();
        per_therapist.sort_by(|a, b| b.done.cmp(&a.done));

        Ok(AttendanceReport {
            totals: AttendanceTotals {
                scheduled,
                done,
                absent,
                absence_rate_pct: rate_pct(absent, scheduled),
            },
            per_therapist,
        })
    }

    /// Per-patient absence ranking for one month. Patients without any
    /// counted session in the period are left out.
    pub async fn patient_absence_ranking(
        &self,
        query: PatientAbsenceQuery,
        therapist_scope: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<PatientAbsenceRow>, ReportError> {
        let (from, to) = month_bounds(query.year, query.month)?;

        let rows = self
            .fetch_statistics_rows(
                from,
                to,
                therapist_scope,
                query.billing_type.map(|b| b.to_string()),
                auth_token,
            )
            .await?;

        let mut per_patient: BTreeMap<Uuid, (u32, u32)> = BTreeMap::new();
        for row in &rows {
            let entry = per_patient.entry(row.patient_id).or_default();
            match row.status {
                AppointmentStatus::Done => entry.0 += 1,
                AppointmentStatus::Absent => entry.1 += 1,
                AppointmentStatus::Awaiting => {}
            }
        }

        let mut ranking: Vec<PatientAbsenceRow> = per_patient
            .into_iter()
            .filter(|(_, (done, absent))| done + absent > 0)
            .map(|(patient_id, (done, absent))| PatientAbsenceRow {
                patient_id,
                scheduled: done + absent,
                done,
                absent,
                absence_rate_pct: rate_pct(absent, done + absent),
            })
            .collect();

        match query.order {
            RankingOrder::RateDesc => ranking.sort_by(|a, b| {
                b.absence_rate_pct
                    .partial_cmp(&a.absence_rate_pct)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.absent.cmp(&a.absent))
            }),
            RankingOrder::RateAsc => ranking.sort_by(|a, b| {
                a.absence_rate_pct
                    .partial_cmp(&b.absence_rate_pct)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.absent.cmp(&b.absent))
            }),
            RankingOrder::AbsencesDesc => ranking.sort_by(|a, b| b.absent.cmp(&a.absent)),
            RankingOrder::AttendancesDesc => ranking.sort_by(|a, b| b.done.cmp(&a.done)),
        }

        Ok(ranking)
    }

    /// Physical occupancy: room by day by grid slot over one Monday-to-
    /// Saturday week, built from the live calendar.
    pub async fn occupancy_grid(
        &self,
        week_of: NaiveDate,
        auth_token: &str,
    ) -> Result<OccupancyGrid, ReportError> {
        let week_start = week_of - Duration::days(week_of.weekday().num_days_from_monday() as i64);
        let week_end = week_start + Duration::days(5);

        let rooms = self.fetch_rooms(auth_token).await?;

        let path = format!(
            "/rest/v1/appointments?deleted=is.false&status=neq.absent&date=gte.{}&date=lte.{}",
            week_start, week_end
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ReportError::DatabaseError(e.to_string()))?;

        let appointments: Vec<Appointment> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| {
                ReportError::DatabaseError(format!("Failed to parse appointments: {}", e))
            })?;

        let grid_starts = slot_grid();
        let rooms = rooms
            .into_iter()
            .map(|room| {
                let days = (0..6)
                    .map(|offset| {
                        let date = week_start + Duration::days(offset);
                        let slots = grid_starts
                            .iter()
                            .map(|start| {
                                let end = *start + Duration::minutes(DEFAULT_SESSION_MINUTES);
                                let occupied = appointments.iter().any(|a| {
                                    a.room_id == Some(room.id)
                                        && a.date == date
                                        && a.start_time < end
                                        && a.end_time > *start
                                });
                                SlotOccupancy {
                                    start: *start,
                                    occupied,
                                }
                            })
                            .collect();
                        DayOccupancy { date, slots }
                    })
                    .collect();
                RoomOccupancy {
                    room_id: room.id,
                    room_name: room.name,
                    days,
                }
            })
            .collect();

        Ok(OccupancyGrid { week_start, rooms })
    }

    /// The statistics set, stated once: concluded sessions that were not
    /// archived, plus every absence archived or not. A replaced absence
    /// keeps counting; a cleared Awaiting row never does.
    async fn fetch_statistics_rows(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        therapist_id: Option<Uuid>,
        billing_type: Option<String>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, ReportError> {
        let mut query_parts = vec![
            format!("date=gte.{}", from),
            format!("date=lte.{}", to),
            "or=(and(status.eq.done,deleted.is.false),status.eq.absent)".to_string(),
        ];
        if let Some(therapist_id) = therapist_id {
            query_parts.push(format!("therapist_id=eq.{}", therapist_id));
        }
        if let Some(billing_type) = billing_type {
            query_parts.push(format!("billing_type=eq.{}", billing_type));
        }

        let path = format!("/rest/v1/appointments?{}", query_parts.join("&"));
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ReportError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| {
                ReportError::DatabaseError(format!("Failed to parse appointments: {}", e))
            })
    }

    async fn fetch_rooms(&self, auth_token: &str) -> Result<Vec<Room>, ReportError> {
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, "/rest/v1/rooms?order=name.asc", Some(auth_token), None)
            .await
            .map_err(|e| ReportError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Room>, _>>()
            .map_err(|e| ReportError::DatabaseError(format!("Failed to parse rooms: {}", e)))
    }
}

fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), ReportError> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ReportError::ValidationError("Invalid month".to_string()))?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| ReportError::ValidationError("Invalid month".to_string()))?;

    Ok((start, next_month - Duration::days(1)))
}

/// Week `index` of the month, Monday-aligned the way a wall calendar is:
/// week 0 is the row containing the 1st.
fn week_bounds(month_start: NaiveDate, index: u32) -> (NaiveDate, NaiveDate) {
    let first_monday =
        month_start - Duration::days(month_start.weekday().num_days_from_monday() as i64);
    let start = first_monday + Duration::weeks(index as i64);
    (start, start + Duration::days(6))
}

fn rate_pct(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 * 100.0 / whole as f64 * 10.0).round() / 10.0
}

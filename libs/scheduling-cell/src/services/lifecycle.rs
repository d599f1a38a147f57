use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::models::{Appointment, AppointmentStatus, ReplacementPolicy, SchedulingError};

pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed. Done and Absent are
    /// terminal; the replacement workflow soft-deletes an absent row but
    /// never changes its status again.
    pub fn validate_status_transition(
        &self,
        current_status: &AppointmentStatus,
        new_status: &AppointmentStatus,
    ) -> Result<(), SchedulingError> {
        debug!("Validating status transition {:?} -> {:?}", current_status, new_status);

        let valid_transitions = self.get_valid_transitions(current_status);

        if !valid_transitions.contains(new_status) {
            warn!("Invalid status transition attempted: {:?} -> {:?}", current_status, new_status);
            return Err(SchedulingError::InvalidStatusTransition(*current_status));
        }

        Ok(())
    }

    pub fn get_valid_transitions(&self, current_status: &AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Awaiting => vec![
                AppointmentStatus::Done,
                AppointmentStatus::Absent,
            ],
            // Terminal states
            AppointmentStatus::Done => vec![],
            AppointmentStatus::Absent => vec![],
        }
    }

    /// The replacement-eligibility rule, kept as explicit configuration.
    pub fn is_replaceable(
        &self,
        policy: ReplacementPolicy,
        appointment: &Appointment,
        now: NaiveDateTime,
    ) -> bool {
        if appointment.status == AppointmentStatus::Done {
            return false;
        }

        match policy {
            ReplacementPolicy::FutureOnly => appointment.starts_at() > now,
            ReplacementPolicy::UntilConcluded => true,
        }
    }

    /// Hard delete is reserved for genuinely erroneous ad-hoc entries:
    /// never generated by a recurring slot, never concluded.
    pub fn can_hard_delete(&self, appointment: &Appointment) -> bool {
        appointment.is_adhoc() && appointment.status != AppointmentStatus::Done
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, Utc};
    use uuid::Uuid;

    fn appointment(status: AppointmentStatus, date: NaiveDate) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            therapist_id: Uuid::new_v4(),
            room_id: None,
            recurring_slot_id: None,
            date,
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 45, 0).unwrap(),
            billing_type: patient_cell::models::BillingType::Private,
            modality: None,
            status,
            absence_reason: None,
            absence_note: None,
            deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn awaiting_can_conclude_or_miss() {
        let service = AppointmentLifecycleService::new();
        assert!(service
            .validate_status_transition(&AppointmentStatus::Awaiting, &AppointmentStatus::Done)
            .is_ok());
        assert!(service
            .validate_status_transition(&AppointmentStatus::Awaiting, &AppointmentStatus::Absent)
            .is_ok());
    }

    #[test]
    fn done_and_absent_are_terminal() {
        let service = AppointmentLifecycleService::new();
        assert!(service
            .validate_status_transition(&AppointmentStatus::Done, &AppointmentStatus::Absent)
            .is_err());
        assert!(service
            .validate_status_transition(&AppointmentStatus::Absent, &AppointmentStatus::Done)
            .is_err());
    }

    #[test]
    fn future_only_policy_rejects_past_slots() {
        let service = AppointmentLifecycleService::new();
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let apt = appointment(AppointmentStatus::Awaiting, date);

        let before = date.pred_opt().unwrap().and_hms_opt(12, 0, 0).unwrap();
        let after = date.succ_opt().unwrap().and_hms_opt(12, 0, 0).unwrap();

        assert!(service.is_replaceable(ReplacementPolicy::FutureOnly, &apt, before));
        assert!(!service.is_replaceable(ReplacementPolicy::FutureOnly, &apt, after));
        // The relaxed policy admits the past slot as long as it never concluded.
        assert!(service.is_replaceable(ReplacementPolicy::UntilConcluded, &apt, after));
    }

    #[test]
    fn done_appointments_are_never_replaceable() {
        let service = AppointmentLifecycleService::new();
        let date = NaiveDate::from_ymd_opt(2030, 3, 4).unwrap();
        let apt = appointment(AppointmentStatus::Done, date);
        let now = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(8, 0, 0).unwrap();

        assert!(!service.is_replaceable(ReplacementPolicy::FutureOnly, &apt, now));
        assert!(!service.is_replaceable(ReplacementPolicy::UntilConcluded, &apt, now));
    }

    #[test]
    fn hard_delete_limited_to_unconcluded_adhoc_rows() {
        let service = AppointmentLifecycleService::new();
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        let adhoc = appointment(AppointmentStatus::Awaiting, date);
        assert!(service.can_hard_delete(&adhoc));

        let mut generated = appointment(AppointmentStatus::Awaiting, date);
        generated.recurring_slot_id = Some(Uuid::new_v4());
        assert!(!service.can_hard_delete(&generated));

        let concluded = appointment(AppointmentStatus::Done, date);
        assert!(!service.can_hard_delete(&concluded));
    }
}

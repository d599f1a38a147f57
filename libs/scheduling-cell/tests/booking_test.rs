use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scheduling_cell::models::{
    AppointmentSearchQuery, CreateBatchRequest, MarkAbsentRequest, AbsenceReason, SchedulingError,
};
use scheduling_cell::services::booking::AppointmentBookingService;
use shared_utils::test_utils::{MockRows, TestConfig};

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn batch_request(
    patient_id: Uuid,
    therapist_id: Uuid,
    date: NaiveDate,
    repeat_weeks: u32,
) -> CreateBatchRequest {
    CreateBatchRequest {
        patient_id,
        therapist_id,
        room_id: None,
        date,
        start_time: t(10, 0),
        end_time: Some(t(11, 0)),
        repeat_weeks,
    }
}

/// Entity lookups and lock plumbing shared by the happy-path batch tests.
async fn mount_batch_fixtures(server: &MockServer, patient_id: Uuid, therapist_id: Uuid) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::patient_row(patient_id, "Ana Souza")
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/therapists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::therapist_row(therapist_id, "Dra. Carla")
        ])))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockRows::lock_row(therapist_id, "slot:test")
        ])))
        .mount(server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn batch_books_free_weeks_and_reports_the_occupied_one() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let therapist_id = Uuid::new_v4();

    mount_batch_fixtures(&mock_server, patient_id, therapist_id).await;

    // Week three (2024-01-15) is pre-occupied by a live booking.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("date", "eq.2024-01-15"))
        .and(query_param("status", "neq.absent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::appointment_row(
                Uuid::new_v4(),
                Uuid::new_v4(),
                therapist_id,
                "2024-01-15",
                "10:00:00",
                "11:00:00",
                "awaiting",
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "neq.absent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.absent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockRows::appointment_row(
                Uuid::new_v4(),
                patient_id,
                therapist_id,
                "2024-01-01",
                "10:00:00",
                "11:00:00",
                "awaiting",
            )
        ])))
        .expect(3)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = AppointmentBookingService::new(&config);

    let base_date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let outcome = service
        .create_batch(batch_request(patient_id, therapist_id, base_date, 3), "token")
        .await
        .expect("batch should succeed");

    assert_eq!(outcome.created, 3);
    assert_eq!(
        outcome.conflicts,
        vec![NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()]
    );
}

#[tokio::test]
async fn booking_over_a_stale_absence_archives_it_first() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let therapist_id = Uuid::new_v4();
    let absence_id = Uuid::new_v4();

    mount_batch_fixtures(&mock_server, patient_id, therapist_id).await;

    // The active view is free (absences never block)...
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "neq.absent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    // ...but an absence row still occupies the slot visually.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.absent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::appointment_row(
                absence_id,
                Uuid::new_v4(),
                therapist_id,
                "2024-01-01",
                "10:00:00",
                "11:00:00",
                "absent",
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", absence_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockRows::appointment_row(
                Uuid::new_v4(),
                patient_id,
                therapist_id,
                "2024-01-01",
                "10:00:00",
                "11:00:00",
                "awaiting",
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = AppointmentBookingService::new(&config);

    let base_date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let outcome = service
        .create_batch(batch_request(patient_id, therapist_id, base_date, 0), "token")
        .await
        .expect("batch should succeed");

    assert_eq!(outcome.created, 1);
    assert!(outcome.conflicts.is_empty());

    // The archive write flips the soft-delete flag, nothing else.
    let requests = mock_server.received_requests().await.unwrap();
    let archive = requests
        .iter()
        .find(|r| r.method.as_str() == "PATCH")
        .expect("archive request sent");
    let body: serde_json::Value = serde_json::from_slice(&archive.body).unwrap();
    assert_eq!(body["deleted"], true);
    assert!(body.get("status").is_none());
}

#[tokio::test]
async fn omitted_end_time_defaults_to_forty_five_minutes() {
    let mock_server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let therapist_id = Uuid::new_v4();

    mount_batch_fixtures(&mock_server, patient_id, therapist_id).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockRows::appointment_row(
                Uuid::new_v4(),
                patient_id,
                therapist_id,
                "2024-01-01",
                "09:00:00",
                "09:45:00",
                "awaiting",
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = AppointmentBookingService::new(&config);

    let request = CreateBatchRequest {
        patient_id,
        therapist_id,
        room_id: None,
        date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        start_time: t(9, 0),
        end_time: None,
        repeat_weeks: 0,
    };

    service.create_batch(request, "token").await.expect("batch should succeed");

    let requests = mock_server.received_requests().await.unwrap();
    let create = requests
        .iter()
        .find(|r| r.method.as_str() == "POST" && r.url.path() == "/rest/v1/appointments")
        .expect("create request sent");
    let body: serde_json::Value = serde_json::from_slice(&create.body).unwrap();
    assert_eq!(body["start_time"], "09:00:00");
    assert_eq!(body["end_time"], "09:45:00");
}

#[tokio::test]
async fn sunday_bookings_are_rejected() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = AppointmentBookingService::new(&config);

    // 2024-01-07 was a Sunday.
    let request = batch_request(
        Uuid::new_v4(),
        Uuid::new_v4(),
        NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
        0,
    );

    let result = service.create_batch(request, "token").await;
    assert_matches!(result, Err(SchedulingError::InvalidTime(_)));
}

#[tokio::test]
async fn oversized_repetition_counts_are_rejected() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = AppointmentBookingService::new(&config);

    let request = batch_request(
        Uuid::new_v4(),
        Uuid::new_v4(),
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        49,
    );

    let result = service.create_batch(request, "token").await;
    assert_matches!(result, Err(SchedulingError::ValidationError(_)));
}

#[tokio::test]
async fn inverted_times_are_rejected() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = AppointmentBookingService::new(&config);

    let mut request = batch_request(
        Uuid::new_v4(),
        Uuid::new_v4(),
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        0,
    );
    request.end_time = Some(t(9, 0));

    let result = service.create_batch(request, "token").await;
    assert_matches!(result, Err(SchedulingError::InvalidTime(_)));
}

#[tokio::test]
async fn search_queries_the_live_set_unless_history_is_requested() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = AppointmentBookingService::new(&config);

    let live_query = AppointmentSearchQuery {
        therapist_id: None,
        patient_id: None,
        status: None,
        from_date: None,
        to_date: None,
        include_deleted: false,
        limit: None,
        offset: None,
    };
    service.search_appointments(live_query, "token").await.unwrap();

    let history_query = AppointmentSearchQuery {
        therapist_id: None,
        patient_id: None,
        status: None,
        from_date: None,
        to_date: None,
        include_deleted: true,
        limit: None,
        offset: None,
    };
    service.search_appointments(history_query, "token").await.unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    let queries: Vec<&str> = requests
        .iter()
        .map(|r| r.url.query().unwrap_or(""))
        .collect();

    // Live view filters the archived rows out; the history view does not.
    assert!(queries[0].contains("deleted=is.false"));
    assert!(!queries[1].contains("deleted=is.false"));
}

#[tokio::test]
async fn marking_a_concluded_appointment_absent_is_rejected() {
    let mock_server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::appointment_row(
                appointment_id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                "2024-01-01",
                "10:00:00",
                "10:45:00",
                "done",
            )
        ])))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = AppointmentBookingService::new(&config);

    let result = service
        .mark_absent(
            appointment_id,
            MarkAbsentRequest {
                reason: AbsenceReason::Unjustified,
                note: None,
            },
            "token",
        )
        .await;

    assert_matches!(result, Err(SchedulingError::InvalidStatusTransition(_)));
}

#[tokio::test]
async fn hard_delete_refuses_slot_generated_appointments() {
    let mock_server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();

    let mut row = MockRows::appointment_row(
        appointment_id,
        Uuid::new_v4(),
        Uuid::new_v4(),
        "2024-01-01",
        "10:00:00",
        "10:45:00",
        "awaiting",
    );
    row["recurring_slot_id"] = json!(Uuid::new_v4());

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = AppointmentBookingService::new(&config);

    let result = service.delete_adhoc_appointment(appointment_id, "token").await;
    assert_matches!(result, Err(SchedulingError::ValidationError(_)));
}

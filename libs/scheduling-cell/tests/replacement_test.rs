use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scheduling_cell::models::{
    AbsenceReason, ReplacementPolicy, ReplacementRequest, SchedulingError,
};
use scheduling_cell::services::replacement::ReplacementService;
use shared_utils::test_utils::{MockRows, TestConfig};

fn morning_of(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(8, 0, 0).unwrap()
}

fn request_with_reason(substitute: Uuid) -> ReplacementRequest {
    ReplacementRequest {
        substitute_patient_id: substitute,
        absence_reason: Some(AbsenceReason::Justified),
        absence_note: Some("called in sick".to_string()),
    }
}

async fn mount_swap_fixtures(
    server: &MockServer,
    original: serde_json::Value,
    substitute_patient: Uuid,
    therapist_id: Uuid,
) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", original["id"].as_str().unwrap())))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([original.clone()])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::patient_row(substitute_patient, "Bruno Lima")
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

    // Slot is free once the original is archived.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "neq.absent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn replacement_archives_the_original_and_seats_the_substitute() {
    let mock_server = MockServer::start().await;
    let original_id = Uuid::new_v4();
    let therapist_id = Uuid::new_v4();
    let substitute_patient = Uuid::new_v4();

    let original = MockRows::appointment_row(
        original_id,
        Uuid::new_v4(),
        therapist_id,
        "2024-06-03",
        "10:00:00",
        "10:45:00",
        "awaiting",
    );

    mount_swap_fixtures(&mock_server, original, substitute_patient, therapist_id).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockRows::appointment_row(
                Uuid::new_v4(),
                substitute_patient,
                therapist_id,
                "2024-06-03",
                "10:00:00",
                "10:45:00",
                "awaiting",
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = ReplacementService::new(&config);

    let substitute = service
        .replace(
            original_id,
            request_with_reason(substitute_patient),
            morning_of(2024, 1, 1),
            "token",
        )
        .await
        .expect("replacement should succeed");

    assert_eq!(substitute.patient_id, substitute_patient);

    let requests = mock_server.received_requests().await.unwrap();

    // The original is marked absent with its justification and archived.
    let archive = requests
        .iter()
        .find(|r| r.method.as_str() == "PATCH")
        .expect("archive request sent");
    let body: serde_json::Value = serde_json::from_slice(&archive.body).unwrap();
    assert_eq!(body["status"], "absent");
    assert_eq!(body["absence_reason"], "justified");
    assert_eq!(body["deleted"], true);

    // The substitute takes the identical slot, ad hoc, awaiting.
    let seat = requests
        .iter()
        .find(|r| r.method.as_str() == "POST" && r.url.path() == "/rest/v1/appointments")
        .expect("substitute created");
    let body: serde_json::Value = serde_json::from_slice(&seat.body).unwrap();
    assert_eq!(body["date"], "2024-06-03");
    assert_eq!(body["start_time"], "10:00:00");
    assert_eq!(body["end_time"], "10:45:00");
    assert_eq!(body["status"], "awaiting");
    assert!(body["recurring_slot_id"].is_null());
}

#[tokio::test]
async fn replaying_a_dead_slot_needs_no_new_justification() {
    let mock_server = MockServer::start().await;
    let original_id = Uuid::new_v4();
    let therapist_id = Uuid::new_v4();
    let substitute_patient = Uuid::new_v4();

    let mut original = MockRows::appointment_row(
        original_id,
        Uuid::new_v4(),
        therapist_id,
        "2024-06-03",
        "10:00:00",
        "10:45:00",
        "absent",
    );
    original["absence_reason"] = json!("unjustified");

    mount_swap_fixtures(&mock_server, original, substitute_patient, therapist_id).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockRows::appointment_row(
                Uuid::new_v4(),
                substitute_patient,
                therapist_id,
                "2024-06-03",
                "10:00:00",
                "10:45:00",
                "awaiting",
            )
        ])))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = ReplacementService::new(&config);

    // No absence_reason supplied: the row already carries one.
    let request = ReplacementRequest {
        substitute_patient_id: substitute_patient,
        absence_reason: None,
        absence_note: None,
    };

    service
        .replace(original_id, request, morning_of(2024, 1, 1), "token")
        .await
        .expect("replay should succeed");

    // Archiving only flips the flag; the recorded absence is untouched,
    // so the statistic is not counted twice.
    let requests = mock_server.received_requests().await.unwrap();
    let archive = requests
        .iter()
        .find(|r| r.method.as_str() == "PATCH")
        .expect("archive request sent");
    let body: serde_json::Value = serde_json::from_slice(&archive.body).unwrap();
    assert_eq!(body["deleted"], true);
    assert!(body.get("status").is_none());
    assert!(body.get("absence_reason").is_none());
}

#[tokio::test]
async fn archived_row_without_absence_fails_loudly() {
    let mock_server = MockServer::start().await;
    let original_id = Uuid::new_v4();

    let mut original = MockRows::appointment_row(
        original_id,
        Uuid::new_v4(),
        Uuid::new_v4(),
        "2024-06-03",
        "10:00:00",
        "10:45:00",
        "awaiting",
    );
    original["deleted"] = json!(true);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([original])))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = ReplacementService::new(&config);

    let result = service
        .replace(
            original_id,
            request_with_reason(Uuid::new_v4()),
            morning_of(2024, 1, 1),
            "token",
        )
        .await;

    assert_matches!(result, Err(SchedulingError::InvariantViolation(_)));
}

#[tokio::test]
async fn concluded_appointments_cannot_be_replaced() {
    let mock_server = MockServer::start().await;
    let original_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::appointment_row(
                original_id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                "2024-06-03",
                "10:00:00",
                "10:45:00",
                "done",
            )
        ])))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = ReplacementService::new(&config);

    let result = service
        .replace(
            original_id,
            request_with_reason(Uuid::new_v4()),
            morning_of(2024, 1, 1),
            "token",
        )
        .await;

    assert_matches!(result, Err(SchedulingError::NotReplaceable(_)));
}

#[tokio::test]
async fn awaiting_slot_demands_a_justification() {
    let mock_server = MockServer::start().await;
    let original_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::appointment_row(
                original_id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                "2024-06-03",
                "10:00:00",
                "10:45:00",
                "awaiting",
            )
        ])))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = ReplacementService::new(&config);

    let request = ReplacementRequest {
        substitute_patient_id: Uuid::new_v4(),
        absence_reason: None,
        absence_note: None,
    };

    let result = service
        .replace(original_id, request, morning_of(2024, 1, 1), "token")
        .await;

    assert_matches!(result, Err(SchedulingError::AbsenceReasonRequired));
}

#[tokio::test]
async fn past_slots_follow_the_configured_policy() {
    let mock_server = MockServer::start().await;
    let original_id = Uuid::new_v4();
    let therapist_id = Uuid::new_v4();
    let substitute_patient = Uuid::new_v4();

    let original = MockRows::appointment_row(
        original_id,
        Uuid::new_v4(),
        therapist_id,
        "2023-12-04",
        "10:00:00",
        "10:45:00",
        "awaiting",
    );

    mount_swap_fixtures(&mock_server, original, substitute_patient, therapist_id).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockRows::appointment_row(
                Uuid::new_v4(),
                substitute_patient,
                therapist_id,
                "2023-12-04",
                "10:00:00",
                "10:45:00",
                "awaiting",
            )
        ])))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let now = morning_of(2024, 1, 1);

    // Default policy: the slot is in the past, no replacement.
    let strict = ReplacementService::new(&config);
    let result = strict
        .replace(original_id, request_with_reason(substitute_patient), now, "token")
        .await;
    assert_matches!(result, Err(SchedulingError::NotReplaceable(_)));

    // Relaxed policy admits any unconcluded slot.
    let relaxed = ReplacementService::with_policy(&config, ReplacementPolicy::UntilConcluded);
    relaxed
        .replace(original_id, request_with_reason(substitute_patient), now, "token")
        .await
        .expect("relaxed policy should admit the slot");
}

#[tokio::test]
async fn failed_substitute_creation_rolls_the_original_back() {
    let mock_server = MockServer::start().await;
    let original_id = Uuid::new_v4();
    let therapist_id = Uuid::new_v4();
    let substitute_patient = Uuid::new_v4();

    let original = MockRows::appointment_row(
        original_id,
        Uuid::new_v4(),
        therapist_id,
        "2024-06-03",
        "10:00:00",
        "10:45:00",
        "awaiting",
    );

    mount_swap_fixtures(&mock_server, original, substitute_patient, therapist_id).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = ReplacementService::new(&config);

    let result = service
        .replace(
            original_id,
            request_with_reason(substitute_patient),
            morning_of(2024, 1, 1),
            "token",
        )
        .await;
    assert_matches!(result, Err(SchedulingError::DatabaseError(_)));

    // The second PATCH is the compensation putting the original back.
    let requests = mock_server.received_requests().await.unwrap();
    let patches: Vec<serde_json::Value> = requests
        .iter()
        .filter(|r| r.method.as_str() == "PATCH")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(patches.len(), 2);
    assert_eq!(patches[1]["status"], "awaiting");
    assert_eq!(patches[1]["deleted"], false);
}

#[tokio::test]
async fn occupied_slot_aborts_the_swap() {
    let mock_server = MockServer::start().await;
    let original_id = Uuid::new_v4();
    let therapist_id = Uuid::new_v4();
    let substitute_patient = Uuid::new_v4();

    let original = MockRows::appointment_row(
        original_id,
        Uuid::new_v4(),
        therapist_id,
        "2024-06-03",
        "10:00:00",
        "10:45:00",
        "absent",
    );

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", original_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([original])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::patient_row(substitute_patient, "Bruno Lima")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockRows::lock_row(therapist_id, "slot:test")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    // A prior replacement's substitute already owns the interval.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "neq.absent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockRows::appointment_row(
                Uuid::new_v4(),
                Uuid::new_v4(),
                therapist_id,
                "2024-06-03",
                "10:00:00",
                "10:45:00",
                "awaiting",
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let service = ReplacementService::new(&config);

    let request = ReplacementRequest {
        substitute_patient_id: substitute_patient,
        absence_reason: None,
        absence_note: None,
    };

    let result = service
        .replace(original_id, request, morning_of(2024, 1, 1), "token")
        .await;
    assert_matches!(result, Err(SchedulingError::ConflictDetected));
}

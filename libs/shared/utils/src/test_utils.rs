use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "therapist".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn therapist(email: &str) -> Self {
        Self::new(email, "therapist")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn owner(email: &str) -> Self {
        Self::new(email, "owner")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned Supabase rows for wiremock-backed tests. Field names match the
/// PostgREST tables the services talk to.
pub struct MockRows;

impl MockRows {
    pub fn patient_row(id: Uuid, name: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "national_id": null,
            "birth_date": "1990-01-01",
            "phone": "11987654321",
            "default_billing_type": "private",
            "insurance_plan_id": null,
            "policy_number": null,
            "active": true,
            "search_key": name.to_lowercase(),
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn therapist_row(id: Uuid, name: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "registration_number": "CRP 06/12345",
            "specialty": "psychology",
            "user_id": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn room_row(id: Uuid, name: &str) -> Value {
        json!({
            "id": id,
            "name": name
        })
    }

    pub fn appointment_row(
        id: Uuid,
        patient_id: Uuid,
        therapist_id: Uuid,
        date: &str,
        start_time: &str,
        end_time: &str,
        status: &str,
    ) -> Value {
        json!({
            "id": id,
            "patient_id": patient_id,
            "therapist_id": therapist_id,
            "room_id": null,
            "recurring_slot_id": null,
            "date": date,
            "start_time": start_time,
            "end_time": end_time,
            "billing_type": "private",
            "status": status,
            "absence_reason": null,
            "absence_note": null,
            "deleted": false,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn recurring_slot_row(
        id: Uuid,
        therapist_id: Uuid,
        patient_id: Uuid,
        weekday: i32,
        start_time: &str,
        end_time: &str,
        effective_from: &str,
    ) -> Value {
        json!({
            "id": id,
            "therapist_id": therapist_id,
            "patient_id": patient_id,
            "room_id": null,
            "modality": null,
            "weekday": weekday,
            "start_time": start_time,
            "end_time": end_time,
            "active": true,
            "effective_from": effective_from,
            "effective_until": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn lock_row(therapist_id: Uuid, lock_key: &str) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "lock_key": lock_key,
            "therapist_id": therapist_id,
            "acquired_at": "2024-01-01T00:00:00Z",
            "expires_at": "2099-01-01T00:00:30Z",
            "process_id": "scheduler_test"
        })
    }

    pub fn clinical_note_row(appointment_id: Uuid, content: &str) -> Value {
        json!({
            "appointment_id": appointment_id,
            "content": content,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }
}

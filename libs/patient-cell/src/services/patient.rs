use std::sync::{Arc, OnceLock};

use chrono::Utc;
use regex::Regex;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{representation_headers, SupabaseClient};

use crate::models::{
    normalize_search_key, CreatePatientRequest, InsurancePlan, Patient, PatientError,
    PatientSearchQuery, UpdatePatientRequest,
};

fn national_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{11}$").unwrap())
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{10,11}$").unwrap())
}

pub struct PatientService {
    supabase: Arc<SupabaseClient>,
}

impl PatientService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub async fn create_patient(
        &self,
        request: CreatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Creating patient {}", request.name);

        validate_identity_fields(request.national_id.as_deref(), request.phone.as_deref())?;
        if request.name.trim().is_empty() {
            return Err(PatientError::ValidationError("Name is required".to_string()));
        }

        if let Some(national_id) = &request.national_id {
            self.ensure_national_id_free(national_id, None, auth_token).await?;
        }

        let now = Utc::now();
        let patient_data = json!({
            "id": Uuid::new_v4(),
            "name": request.name.trim(),
            "national_id": request.national_id,
            "birth_date": request.birth_date,
            "phone": request.phone,
            "default_billing_type": request.default_billing_type,
            "insurance_plan_id": request.insurance_plan_id,
            "policy_number": request.policy_number,
            "active": true,
            "search_key": normalize_search_key(&request.name),
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/patients",
                Some(auth_token),
                Some(patient_data),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        let patient: Patient = parse_single_row(result)?;
        info!("Patient {} created", patient.id);
        Ok(patient)
    }

    pub async fn get_patient(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(PatientError::NotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| PatientError::DatabaseError(format!("Failed to parse patient: {}", e)))
    }

    pub async fn update_patient(
        &self,
        patient_id: Uuid,
        request: UpdatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Updating patient {}", patient_id);

        // Confirms the row exists before patching.
        self.get_patient(patient_id, auth_token).await?;

        validate_identity_fields(request.national_id.as_deref(), request.phone.as_deref())?;

        if let Some(national_id) = &request.national_id {
            self.ensure_national_id_free(national_id, Some(patient_id), auth_token).await?;
        }

        let mut update_data = serde_json::Map::new();
        if let Some(name) = &request.name {
            if name.trim().is_empty() {
                return Err(PatientError::ValidationError("Name is required".to_string()));
            }
            update_data.insert("name".to_string(), json!(name.trim()));
            update_data.insert("search_key".to_string(), json!(normalize_search_key(name)));
        }
        if let Some(national_id) = &request.national_id {
            update_data.insert("national_id".to_string(), json!(national_id));
        }
        if let Some(birth_date) = request.birth_date {
            update_data.insert("birth_date".to_string(), json!(birth_date));
        }
        if let Some(phone) = &request.phone {
            update_data.insert("phone".to_string(), json!(phone));
        }
        if let Some(billing_type) = request.default_billing_type {
            update_data.insert("default_billing_type".to_string(), json!(billing_type));
        }
        if let Some(plan_id) = request.insurance_plan_id {
            update_data.insert("insurance_plan_id".to_string(), json!(plan_id));
        }
        if let Some(policy_number) = &request.policy_number {
            update_data.insert("policy_number".to_string(), json!(policy_number));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update_data)),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        parse_single_row(result)
    }

    pub async fn search_patients(
        &self,
        query: PatientSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Patient>, PatientError> {
        let mut query_parts = Vec::new();

        match query.status.as_deref() {
            Some("all") => {}
            Some("inactive") => query_parts.push("active=is.false".to_string()),
            _ => query_parts.push("active=is.true".to_string()),
        }

        if let Some(billing_type) = query.billing_type {
            query_parts.push(format!("default_billing_type=eq.{}", billing_type));
        }

        if let Some(q) = &query.q {
            let q = q.trim();
            if !q.is_empty() {
                if q.chars().all(|c| c.is_ascii_digit()) {
                    query_parts.push(format!("national_id=like.{}*", q));
                } else {
                    let needle = urlencoding::encode(&normalize_search_key(q)).into_owned();
                    query_parts.push(format!("search_key=like.*{}*", needle));
                }
            }
        }

        query_parts.push("order=name.asc".to_string());
        let mut path = format!("/rest/v1/patients?{}", query_parts.join("&"));
        if let Some(limit) = query.limit {
            path.push_str(&format!("&limit={}", limit));
        }
        if let Some(offset) = query.offset {
            path.push_str(&format!("&offset={}", offset));
        }

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(|row| serde_json::from_value(row))
            .collect::<Result<Vec<Patient>, _>>()
            .map_err(|e| PatientError::DatabaseError(format!("Failed to parse patients: {}", e)))
    }

    /// Patients are never hard-deleted; they leave the active roster here.
    pub async fn deactivate_patient(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        info!("Deactivating patient {}", patient_id);

        self.get_patient(patient_id, auth_token).await?;

        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let update = json!({
            "active": false,
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        parse_single_row(result)
    }

    pub async fn list_insurance_plans(
        &self,
        auth_token: &str,
    ) -> Result<Vec<InsurancePlan>, PatientError> {
        let path = "/rest/v1/insurance_plans?active=is.true&order=name.asc";
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(|row| serde_json::from_value(row))
            .collect::<Result<Vec<InsurancePlan>, _>>()
            .map_err(|e| PatientError::DatabaseError(format!("Failed to parse plans: {}", e)))
    }

    async fn ensure_national_id_free(
        &self,
        national_id: &str,
        exclude_patient_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), PatientError> {
        let mut path = format!(
            "/rest/v1/patients?national_id=eq.{}&limit=1",
            national_id
        );
        if let Some(exclude) = exclude_patient_id {
            path.push_str(&format!("&id=neq.{}", exclude));
        }

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        if !result.is_empty() {
            return Err(PatientError::NationalIdTaken {
                national_id: national_id.to_string(),
            });
        }
        Ok(())
    }
}

fn validate_identity_fields(
    national_id: Option<&str>,
    phone: Option<&str>,
) -> Result<(), PatientError> {
    if let Some(national_id) = national_id {
        if !national_id_regex().is_match(national_id) {
            return Err(PatientError::ValidationError(
                "National id must be exactly 11 digits".to_string(),
            ));
        }
    }
    if let Some(phone) = phone {
        if !phone_regex().is_match(phone) {
            return Err(PatientError::ValidationError(
                "Phone must be 10 or 11 digits, area code included".to_string(),
            ));
        }
    }
    Ok(())
}

fn parse_single_row(result: Vec<Value>) -> Result<Patient, PatientError> {
    let row = result
        .into_iter()
        .next()
        .ok_or_else(|| PatientError::DatabaseError("Write returned no rows".to_string()))?;
    serde_json::from_value(row)
        .map_err(|e| PatientError::DatabaseError(format!("Failed to parse patient: {}", e)))
}

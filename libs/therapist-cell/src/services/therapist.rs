use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{representation_headers, SupabaseClient};

use crate::models::{
    CreateTherapistRequest, Room, Therapist, TherapistError, TherapistSearchQuery,
    UpdateTherapistRequest,
};

pub struct TherapistService {
    supabase: Arc<SupabaseClient>,
}

impl TherapistService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub async fn create_therapist(
        &self,
        request: CreateTherapistRequest,
        auth_token: &str,
    ) -> Result<Therapist, TherapistError> {
        if request.name.trim().is_empty() {
            return Err(TherapistError::ValidationError("Name is required".to_string()));
        }

        debug!("Creating therapist {}", request.name);

        let now = Utc::now();
        let therapist_data = json!({
            "id": Uuid::new_v4(),
            "name": request.name.trim(),
            "registration_number": request.registration_number,
            "specialty": request.specialty,
            "user_id": request.user_id,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/therapists",
                Some(auth_token),
                Some(therapist_data),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| TherapistError::DatabaseError(e.to_string()))?;

        let therapist: Therapist = parse_single(result)?;
        info!("Therapist {} created", therapist.id);
        Ok(therapist)
    }

    pub async fn get_therapist(
        &self,
        therapist_id: Uuid,
        auth_token: &str,
    ) -> Result<Therapist, TherapistError> {
        let path = format!("/rest/v1/therapists?id=eq.{}", therapist_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| TherapistError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(TherapistError::NotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| TherapistError::DatabaseError(format!("Failed to parse therapist: {}", e)))
    }

    /// Resolve the therapist profile linked to a login identity, if any.
    pub async fn get_therapist_by_user(
        &self,
        user_id: &str,
        auth_token: &str,
    ) -> Result<Option<Therapist>, TherapistError> {
        let path = format!("/rest/v1/therapists?user_id=eq.{}", user_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| TherapistError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map(Some)
                .map_err(|e| TherapistError::DatabaseError(format!("Failed to parse therapist: {}", e))),
            None => Ok(None),
        }
    }

    pub async fn list_therapists(
        &self,
        query: TherapistSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Therapist>, TherapistError> {
        let mut query_parts = Vec::new();

        if let Some(q) = &query.q {
            let needle = urlencoding::encode(q.trim()).into_owned();
            query_parts.push(format!("name=ilike.*{}*", needle));
        }
        if let Some(specialty) = query.specialty {
            query_parts.push(format!("specialty=eq.{}", specialty));
        }

        let path = if query_parts.is_empty() {
            "/rest/v1/therapists?order=name.asc".to_string()
        } else {
            format!("/rest/v1/therapists?{}&order=name.asc", query_parts.join("&"))
        };

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| TherapistError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(|row| serde_json::from_value(row))
            .collect::<Result<Vec<Therapist>, _>>()
            .map_err(|e| TherapistError::DatabaseError(format!("Failed to parse therapists: {}", e)))
    }

    pub async fn update_therapist(
        &self,
        therapist_id: Uuid,
        request: UpdateTherapistRequest,
        auth_token: &str,
    ) -> Result<Therapist, TherapistError> {
        self.get_therapist(therapist_id, auth_token).await?;

        let mut update_data = serde_json::Map::new();
        if let Some(name) = &request.name {
            if name.trim().is_empty() {
                return Err(TherapistError::ValidationError("Name is required".to_string()));
            }
            update_data.insert("name".to_string(), json!(name.trim()));
        }
        if let Some(registration_number) = &request.registration_number {
            update_data.insert("registration_number".to_string(), json!(registration_number));
        }
        if let Some(specialty) = request.specialty {
            update_data.insert("specialty".to_string(), json!(specialty));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/therapists?id=eq.{}", therapist_id);
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
            .map_err(|e| TherapistError::DatabaseError(e.to_string()))?;

        parse_single(result)
    }

    /// Removal is blocked while any appointment still references the
    /// therapist, mirroring a restrictive foreign-key rule.
    pub async fn delete_therapist(
        &self,
        therapist_id: Uuid,
        auth_token: &str,
    ) -> Result<(), TherapistError> {
        self.get_therapist(therapist_id, auth_token).await?;

        let path = format!(
            "/rest/v1/appointments?therapist_id=eq.{}&limit=1",
            therapist_id
        );
        let referencing: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| TherapistError::DatabaseError(e.to_string()))?;

        if !referencing.is_empty() {
            warn!("Refusing to delete therapist {} with appointments", therapist_id);
            return Err(TherapistError::HasAppointments);
        }

        let path = format!("/rest/v1/therapists?id=eq.{}", therapist_id);
        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                Some(auth_token),
                None,
                Some(representation_headers()),
            )
            .await
            .map_err(|e| TherapistError::DatabaseError(e.to_string()))?;

        info!("Therapist {} deleted", therapist_id);
        Ok(())
    }

    pub async fn create_room(&self, name: &str, auth_token: &str) -> Result<Room, TherapistError> {
        if name.trim().is_empty() {
            return Err(TherapistError::ValidationError("Room name is required".to_string()));
        }

        let room_data = json!({
            "id": Uuid::new_v4(),
            "name": name.trim()
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/rooms",
                Some(auth_token),
                Some(room_data),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| TherapistError::DatabaseError(e.to_string()))?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| TherapistError::DatabaseError("Write returned no rows".to_string()))?;
        serde_json::from_value(row)
            .map_err(|e| TherapistError::DatabaseError(format!("Failed to parse room: {}", e)))
    }

    pub async fn list_rooms(&self, auth_token: &str) -> Result<Vec<Room>, TherapistError> {
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, "/rest/v1/rooms?order=name.asc", Some(auth_token), None)
            .await
            .map_err(|e| TherapistError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(|row| serde_json::from_value(row))
            .collect::<Result<Vec<Room>, _>>()
            .map_err(|e| TherapistError::DatabaseError(format!("Failed to parse rooms: {}", e)))
    }
}

fn parse_single(result: Vec<Value>) -> Result<Therapist, TherapistError> {
    let row = result
        .into_iter()
        .next()
        .ok_or_else(|| TherapistError::DatabaseError("Write returned no rows".to_string()))?;
    serde_json::from_value(row)
        .map_err(|e| TherapistError::DatabaseError(format!("Failed to parse therapist: {}", e)))
}

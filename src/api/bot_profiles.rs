//! Bot profile CRUD. Provider credentials are encrypted before they ever
//! reach the database and are never echoed back.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::blocking;
use crate::auth::AuthContext;
use crate::error::{AppError, AppResult};
use crate::shared::models::BotProfile;
use crate::shared::state::AppState;
use crate::shared::utils::utc_now;

#[derive(Debug, Deserialize)]
pub struct CreateBotProfileRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
    /// Provider credentials, e.g. {"api_key": "sk-..."}; encrypted at rest
    pub credentials: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBotProfileRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
    /// Set to {} to clear stored credentials
    pub credentials: Option<Value>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct BotProfileRead {
    #[serde(flatten)]
    pub profile: BotProfile,
    pub has_credentials: bool,
}

impl From<BotProfile> for BotProfileRead {
    fn from(profile: BotProfile) -> Self {
        let has_credentials = profile.encrypted_credentials.is_some();
        Self {
            profile,
            has_credentials,
        }
    }
}

fn validate_params(name: Option<&str>, temperature: Option<f64>, max_tokens: Option<i32>) -> AppResult<()> {
    if let Some(name) = name {
        if name.is_empty() || name.len() > 255 {
            return Err(AppError::invalid("Name must be 1-255 characters"));
        }
    }
    if let Some(t) = temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(AppError::invalid("Temperature must be between 0 and 2"));
        }
    }
    if let Some(m) = max_tokens {
        if !(1..=128_000).contains(&m) {
            return Err(AppError::invalid("max_tokens must be between 1 and 128000"));
        }
    }
    Ok(())
}

fn encrypt_credentials(state: &Arc<AppState>, creds: &Value) -> AppResult<Option<String>> {
    let Some(obj) = creds.as_object() else {
        return Err(AppError::invalid("credentials must be a JSON object"));
    };
    if obj.is_empty() {
        // An explicit empty object clears stored credentials
        return Ok(None);
    }
    let plain = serde_json::to_string(creds)
        .map_err(|e| AppError::internal(format!("credential serialization failed: {}", e)))?;
    let ciphertext = state
        .cipher
        .encrypt_value(&plain)
        .map_err(|e| AppError::internal(format!("credential encryption failed: {}", e)))?;
    Ok(Some(ciphertext))
}

/// POST /v1/bot-profiles
pub async fn create_profile(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(body): Json<CreateBotProfileRequest>,
) -> AppResult<(StatusCode, Json<BotProfileRead>)> {
    validate_params(Some(body.name.as_str()), body.temperature, body.max_tokens)?;

    let encrypted_credentials = match &body.credentials {
        Some(creds) => encrypt_credentials(&state, creds)?,
        None => None,
    };

    let profile = blocking(&state, move |conn| {
        use crate::shared::schema::bot_profiles::dsl;
        let now = utc_now();
        let profile = BotProfile {
            id: Uuid::new_v4(),
            tenant_id: auth.tenant_id,
            name: body.name,
            description: body.description,
            model: body
                .model
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            system_prompt: body
                .system_prompt
                .unwrap_or_else(|| "You are a helpful assistant.".to_string()),
            temperature: body.temperature.unwrap_or(0.7),
            max_tokens: body.max_tokens.unwrap_or(1024),
            encrypted_credentials,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(dsl::bot_profiles)
            .values(&profile)
            .execute(conn)?;
        Ok(profile)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(profile.into())))
}

/// GET /v1/bot-profiles
pub async fn list_profiles(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> AppResult<Json<Vec<BotProfileRead>>> {
    let profiles = blocking(&state, move |conn| {
        use crate::shared::schema::bot_profiles::dsl;
        let rows = dsl::bot_profiles
            .filter(dsl::tenant_id.eq(auth.tenant_id))
            .filter(dsl::is_active.eq(true))
            .order(dsl::created_at.desc())
            .load::<BotProfile>(conn)?;
        Ok(rows)
    })
    .await?;
    Ok(Json(profiles.into_iter().map(Into::into).collect()))
}

pub(crate) fn get_profile_scoped(
    conn: &mut diesel::PgConnection,
    profile_id: Uuid,
    tenant_id: Uuid,
) -> AppResult<BotProfile> {
    use crate::shared::schema::bot_profiles::dsl;
    dsl::bot_profiles
        .filter(dsl::id.eq(profile_id))
        .filter(dsl::tenant_id.eq(tenant_id))
        .first::<BotProfile>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Bot profile not found"))
}

/// GET /v1/bot-profiles/{id}
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(profile_id): Path<Uuid>,
) -> AppResult<Json<BotProfileRead>> {
    let profile = blocking(&state, move |conn| {
        get_profile_scoped(conn, profile_id, auth.tenant_id)
    })
    .await?;
    Ok(Json(profile.into()))
}

/// PATCH /v1/bot-profiles/{id}
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(profile_id): Path<Uuid>,
    Json(body): Json<UpdateBotProfileRequest>,
) -> AppResult<Json<BotProfileRead>> {
    validate_params(body.name.as_deref(), body.temperature, body.max_tokens)?;

    let new_credentials = match &body.credentials {
        Some(creds) => Some(encrypt_credentials(&state, creds)?),
        None => None,
    };

    let profile = blocking(&state, move |conn| {
        use crate::shared::schema::bot_profiles::dsl;
        let mut profile = get_profile_scoped(conn, profile_id, auth.tenant_id)?;

        if let Some(name) = body.name {
            profile.name = name;
        }
        if let Some(description) = body.description {
            profile.description = description;
        }
        if let Some(model) = body.model {
            profile.model = model;
        }
        if let Some(system_prompt) = body.system_prompt {
            profile.system_prompt = system_prompt;
        }
        if let Some(temperature) = body.temperature {
            profile.temperature = temperature;
        }
        if let Some(max_tokens) = body.max_tokens {
            profile.max_tokens = max_tokens;
        }
        if let Some(encrypted) = new_credentials {
            profile.encrypted_credentials = encrypted;
        }
        if let Some(is_active) = body.is_active {
            profile.is_active = is_active;
        }
        profile.updated_at = utc_now();

        diesel::update(dsl::bot_profiles.filter(dsl::id.eq(profile.id)))
            .set((
                dsl::name.eq(&profile.name),
                dsl::description.eq(&profile.description),
                dsl::model.eq(&profile.model),
                dsl::system_prompt.eq(&profile.system_prompt),
                dsl::temperature.eq(profile.temperature),
                dsl::max_tokens.eq(profile.max_tokens),
                dsl::encrypted_credentials.eq(profile.encrypted_credentials.clone()),
                dsl::is_active.eq(profile.is_active),
                dsl::updated_at.eq(profile.updated_at),
            ))
            .execute(conn)?;
        Ok(profile)
    })
    .await?;

    Ok(Json(profile.into()))
}

/// DELETE /v1/bot-profiles/{id}. Soft delete: hides the profile from lists
/// while preserving referential integrity for sources and chats.
pub async fn delete_profile(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(profile_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    blocking(&state, move |conn| {
        use crate::shared::schema::bot_profiles::dsl;
        let updated = diesel::update(
            dsl::bot_profiles
                .filter(dsl::id.eq(profile_id))
                .filter(dsl::tenant_id.eq(auth.tenant_id)),
        )
        .set((dsl::is_active.eq(false), dsl::updated_at.eq(utc_now())))
        .execute(conn)?;
        if updated == 0 {
            return Err(AppError::not_found("Bot profile not found"));
        }
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

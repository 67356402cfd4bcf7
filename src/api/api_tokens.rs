//! API token lifecycle: create, list, revoke.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::blocking;
use crate::auth::AuthContext;
use crate::error::{AppError, AppResult};
use crate::security::{generate_api_token, hash_api_token};
use crate::shared::models::ApiToken;
use crate::shared::state::AppState;
use crate::shared::utils::utc_now;

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct TokenCreatedResponse {
    #[serde(flatten)]
    pub token: ApiToken,
    /// Shown once; store it securely
    pub raw_token: String,
}

/// POST /v1/api-tokens
pub async fn create_token(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(body): Json<CreateTokenRequest>,
) -> AppResult<(StatusCode, Json<TokenCreatedResponse>)> {
    if body.name.is_empty() || body.name.len() > 255 {
        return Err(AppError::invalid("Token name must be 1-255 characters"));
    }

    let raw_token = generate_api_token();
    let token_hash = hash_api_token(&raw_token);
    let token_prefix = raw_token[..8].to_string();

    let token = blocking(&state, move |conn| {
        use crate::shared::schema::api_tokens::dsl;
        let now = utc_now();
        let token = ApiToken {
            id: Uuid::new_v4(),
            tenant_id: auth.tenant_id,
            user_id: auth.user_id,
            name: body.name,
            token_hash,
            token_prefix,
            last_used_at: None,
            revoked_at: None,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(dsl::api_tokens)
            .values(&token)
            .execute(conn)?;
        Ok(token)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(TokenCreatedResponse { token, raw_token }),
    ))
}

/// GET /v1/api-tokens
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> AppResult<Json<Vec<ApiToken>>> {
    let tokens = blocking(&state, move |conn| {
        use crate::shared::schema::api_tokens::dsl;
        let rows = dsl::api_tokens
            .filter(dsl::tenant_id.eq(auth.tenant_id))
            .filter(dsl::revoked_at.is_null())
            .order(dsl::created_at.desc())
            .load::<ApiToken>(conn)?;
        Ok(rows)
    })
    .await?;
    Ok(Json(tokens))
}

/// DELETE /v1/api-tokens/{id}. Sets `revoked_at`; the token can no longer
/// authenticate but the row stays for auditability.
pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(token_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    blocking(&state, move |conn| {
        use crate::shared::schema::api_tokens::dsl;
        let updated = diesel::update(
            dsl::api_tokens
                .filter(dsl::id.eq(token_id))
                .filter(dsl::tenant_id.eq(auth.tenant_id))
                .filter(dsl::revoked_at.is_null()),
        )
        .set((
            dsl::revoked_at.eq(Some(utc_now())),
            dsl::updated_at.eq(utc_now()),
        ))
        .execute(conn)?;
        if updated == 0 {
            return Err(AppError::not_found("Token not found"));
        }
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

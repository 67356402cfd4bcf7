//! Login and current-identity endpoints.

use axum::extract::State;
use axum::Json;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::blocking;
use crate::auth::AuthContext;
use crate::error::{AppError, AppResult};
use crate::security::verify_password;
use crate::shared::models::{Tenant, User};
use crate::shared::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub user: User,
    pub tenant: Tenant,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    pub tenant: Tenant,
}

/// POST /v1/auth/login. Email + password in exchange for a signed session
/// token. The same generic 401 covers unknown emails and bad passwords.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let email = body.email.clone();
    let found = blocking(&state, move |conn| {
        use crate::shared::schema::{tenants, users};
        let user = users::dsl::users
            .filter(users::dsl::email.eq(&email))
            .first::<User>(conn)
            .optional()?;
        let Some(user) = user else {
            return Ok(None);
        };
        let tenant = tenants::dsl::tenants
            .filter(tenants::dsl::id.eq(user.tenant_id))
            .first::<Tenant>(conn)
            .optional()?;
        Ok(tenant.map(|t| (user, t)))
    })
    .await?;

    let Some((user, tenant)) = found else {
        return Err(AppError::unauthenticated("Invalid email or password"));
    };

    if !verify_password(&body.password, &user.password_hash) {
        return Err(AppError::unauthenticated("Invalid email or password"));
    }
    if !user.is_active {
        return Err(AppError::forbidden("Account is disabled"));
    }
    if !tenant.is_active {
        return Err(AppError::forbidden("Tenant is disabled"));
    }

    let access_token = state
        .sessions
        .sign_session(user.id, user.tenant_id, &user.role)
        .map_err(|e| AppError::internal(format!("session signing failed: {}", e)))?;

    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer",
        user,
        tenant,
    }))
}

/// GET /v1/auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> AppResult<Json<MeResponse>> {
    let (user, tenant) = blocking(&state, move |conn| {
        use crate::shared::schema::{tenants, users};
        let user = users::dsl::users
            .filter(users::dsl::id.eq(auth.user_id))
            .filter(users::dsl::tenant_id.eq(auth.tenant_id))
            .first::<User>(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("User not found"))?;
        let tenant = tenants::dsl::tenants
            .filter(tenants::dsl::id.eq(auth.tenant_id))
            .first::<Tenant>(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("Tenant not found"))?;
        Ok((user, tenant))
    })
    .await?;

    Ok(Json(MeResponse { user, tenant }))
}

//! Tenant bootstrap and tenant info.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::blocking;
use crate::auth::AuthContext;
use crate::error::{AppError, AppResult};
use crate::security::{generate_api_token, hash_api_token, hash_password};
use crate::shared::models::{ApiToken, Tenant, User, UserRole};
use crate::shared::state::AppState;
use crate::shared::utils::utc_now;

#[derive(Debug, Deserialize)]
pub struct BootstrapRequest {
    pub tenant_name: String,
    pub tenant_slug: String,
    pub owner_email: String,
    pub owner_password: String,
    #[serde(default)]
    pub owner_display_name: String,
}

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub tenant: Tenant,
    pub user: User,
    /// Shown once; store it securely
    pub api_token: String,
    pub token_prefix: String,
}

fn validate_slug(slug: &str) -> AppResult<()> {
    if slug.is_empty() || slug.len() > 100 {
        return Err(AppError::invalid("Slug must be 1-100 characters"));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(AppError::invalid(
            "Slug may only contain lowercase letters, digits, and dashes",
        ));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> AppResult<()> {
    let valid = email.len() <= 320
        && email.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        });
    if valid {
        Ok(())
    } else {
        Err(AppError::invalid("Invalid email address"))
    }
}

pub(crate) fn validate_password(password: &str) -> AppResult<()> {
    if password.len() < 8 || password.len() > 128 {
        return Err(AppError::invalid("Password must be 8-128 characters"));
    }
    Ok(())
}

/// POST /v1/tenants. The only unauthenticated write endpoint: creates a
/// tenant, its owner, and the first API token in one transaction. The raw
/// token appears exactly once, in this response.
pub async fn bootstrap_tenant(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BootstrapRequest>,
) -> AppResult<(StatusCode, Json<BootstrapResponse>)> {
    validate_slug(&body.tenant_slug)?;
    validate_email(&body.owner_email)?;
    validate_password(&body.owner_password)?;
    if body.tenant_name.is_empty() || body.tenant_name.len() > 255 {
        return Err(AppError::invalid("Tenant name must be 1-255 characters"));
    }

    let password_hash = hash_password(&body.owner_password)
        .map_err(|e| AppError::internal(format!("password hashing failed: {}", e)))?;
    let raw_token = generate_api_token();
    let token_hash = hash_api_token(&raw_token);
    let token_prefix = raw_token[..8].to_string();
    let prefix_for_response = token_prefix.clone();

    let slug = body.tenant_slug.clone();
    let (tenant, user) = blocking(&state, move |conn| {
        use crate::shared::schema::{api_tokens, tenants, users};
        let now = utc_now();

        let existing: Option<Uuid> = tenants::dsl::tenants
            .filter(tenants::dsl::slug.eq(&slug))
            .select(tenants::dsl::id)
            .first(conn)
            .optional()?;
        if existing.is_some() {
            return Err(AppError::conflict(format!(
                "Slug '{}' is already taken",
                slug
            )));
        }

        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: body.tenant_name.clone(),
            slug,
            plan: "free".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let user = User {
            id: Uuid::new_v4(),
            tenant_id: tenant.id,
            email: body.owner_email.clone(),
            password_hash,
            display_name: body.owner_display_name.clone(),
            role: UserRole::Owner.as_str().to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let token = ApiToken {
            id: Uuid::new_v4(),
            tenant_id: tenant.id,
            user_id: user.id,
            name: "default".to_string(),
            token_hash,
            token_prefix: token_prefix.clone(),
            last_used_at: None,
            revoked_at: None,
            created_at: now,
            updated_at: now,
        };

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::insert_into(tenants::dsl::tenants)
                .values(&tenant)
                .execute(conn)?;
            diesel::insert_into(users::dsl::users)
                .values(&user)
                .execute(conn)?;
            diesel::insert_into(api_tokens::dsl::api_tokens)
                .values(&token)
                .execute(conn)?;
            Ok(())
        })?;

        Ok((tenant, user))
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(BootstrapResponse {
            tenant,
            user,
            api_token: raw_token,
            token_prefix: prefix_for_response,
        }),
    ))
}

/// GET /v1/tenants/me
pub async fn current_tenant(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> AppResult<Json<Tenant>> {
    let tenant = blocking(&state, move |conn| {
        use crate::shared::schema::tenants::dsl;
        let tenant = dsl::tenants
            .filter(dsl::id.eq(auth.tenant_id))
            .first::<Tenant>(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("Tenant not found"))?;
        Ok(tenant)
    })
    .await?;
    Ok(Json(tenant))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_validation() {
        assert!(validate_slug("acme-corp-2").is_ok());
        assert!(validate_slug("Acme").is_err());
        assert!(validate_slug("a b").is_err());
        assert!(validate_slug("").is_err());
    }

    #[test]
    fn test_email_validation() {
        assert!(validate_email("a@x.io").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@x.io").is_err());
        assert!(validate_email("a@nodot").is_err());
    }

    #[test]
    fn test_password_validation() {
        assert!(validate_password("pw12345678").is_ok());
        assert!(validate_password("short").is_err());
    }
}

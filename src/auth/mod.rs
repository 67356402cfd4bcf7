//! Bearer credential resolution.
//!
//! Two credential kinds share the `Authorization: Bearer` header. Signed
//! session tokens contain `.` separators; opaque API tokens are base64url
//! and never do. Either way the result is an [`AuthContext`] scoped to one
//! tenant, or a 401. Inactive users and tenants fail closed.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use diesel::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::security::{hash_api_token, SessionError};
use crate::shared::models::{ApiToken, Tenant, User, UserRole};
use crate::shared::state::AppState;
use crate::shared::utils::utc_now;

/// Resolved identity carried through a request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role: UserRole,
    /// Set when the credential was an API token
    pub token_id: Option<Uuid>,
}

impl AuthContext {
    pub fn require_admin(&self) -> AppResult<()> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("Administrator role required"))
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthenticated("Missing Authorization header"))?;

        let credential = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::unauthenticated("Expected a bearer credential"))?
            .trim();
        if credential.is_empty() {
            return Err(AppError::unauthenticated("Empty bearer credential"));
        }

        if credential.contains('.') {
            resolve_session(state, credential).await
        } else {
            resolve_api_token(state, credential).await
        }
    }
}

async fn resolve_session(state: &Arc<AppState>, token: &str) -> AppResult<AuthContext> {
    let claims = state.sessions.verify_session(token).map_err(|e| match e {
        SessionError::Expired => AppError::unauthenticated("Session expired"),
        SessionError::Invalid => AppError::unauthenticated("Invalid credentials"),
    })?;

    let user_id: Uuid = claims
        .sub
        .parse()
        .map_err(|_| AppError::unauthenticated("Invalid credentials"))?;
    let tenant_id: Uuid = claims
        .tid
        .parse()
        .map_err(|_| AppError::unauthenticated("Invalid credentials"))?;

    let pool = state.conn.clone();
    let (user, tenant) = tokio::task::spawn_blocking(move || -> AppResult<(User, Tenant)> {
        let mut conn = pool.get()?;
        let user = crate::shared::schema::users::dsl::users
            .filter(crate::shared::schema::users::dsl::id.eq(user_id))
            .filter(crate::shared::schema::users::dsl::tenant_id.eq(tenant_id))
            .first::<User>(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::unauthenticated("Invalid credentials"))?;
        let tenant = crate::shared::schema::tenants::dsl::tenants
            .filter(crate::shared::schema::tenants::dsl::id.eq(tenant_id))
            .first::<Tenant>(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::unauthenticated("Invalid credentials"))?;
        Ok((user, tenant))
    })
    .await??;

    ensure_active(&user, &tenant)?;

    // The database is authoritative for the role, not the token claims.
    let role = UserRole::parse(&user.role)
        .ok_or_else(|| AppError::internal(format!("unknown role '{}'", user.role)))?;

    Ok(AuthContext {
        tenant_id,
        user_id,
        role,
        token_id: None,
    })
}

async fn resolve_api_token(state: &Arc<AppState>, raw: &str) -> AppResult<AuthContext> {
    let digest = hash_api_token(raw);
    let pool = state.conn.clone();

    let (token, user, _tenant) =
        tokio::task::spawn_blocking(move || -> AppResult<(ApiToken, User, Tenant)> {
            use crate::shared::schema::{api_tokens, tenants, users};
            let mut conn = pool.get()?;

            let token = api_tokens::dsl::api_tokens
                .filter(api_tokens::dsl::token_hash.eq(&digest))
                .filter(api_tokens::dsl::revoked_at.is_null())
                .first::<ApiToken>(&mut conn)
                .optional()?
                .ok_or_else(|| AppError::unauthenticated("Invalid credentials"))?;

            let user = users::dsl::users
                .filter(users::dsl::id.eq(token.user_id))
                .first::<User>(&mut conn)
                .optional()?
                .ok_or_else(|| AppError::unauthenticated("Invalid credentials"))?;

            let tenant = tenants::dsl::tenants
                .filter(tenants::dsl::id.eq(token.tenant_id))
                .first::<Tenant>(&mut conn)
                .optional()?
                .ok_or_else(|| AppError::unauthenticated("Invalid credentials"))?;

            ensure_active(&user, &tenant)?;

            diesel::update(api_tokens::dsl::api_tokens.filter(api_tokens::dsl::id.eq(token.id)))
                .set(api_tokens::dsl::last_used_at.eq(Some(utc_now())))
                .execute(&mut conn)?;

            Ok((token, user, tenant))
        })
        .await??;

    let role = UserRole::parse(&user.role)
        .ok_or_else(|| AppError::internal(format!("unknown role '{}'", user.role)))?;

    Ok(AuthContext {
        tenant_id: token.tenant_id,
        user_id: token.user_id,
        role,
        token_id: Some(token.id),
    })
}

fn ensure_active(user: &User, tenant: &Tenant) -> AppResult<()> {
    if !user.is_active {
        return Err(AppError::unauthenticated("Account is disabled"));
    }
    if !tenant.is_active {
        return Err(AppError::unauthenticated("Tenant is disabled"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(role: UserRole) -> AuthContext {
        AuthContext {
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            role,
            token_id: None,
        }
    }

    #[test]
    fn test_require_admin() {
        assert!(context(UserRole::Owner).require_admin().is_ok());
        assert!(context(UserRole::Admin).require_admin().is_ok());
        assert!(context(UserRole::Member).require_admin().is_err());
    }

    #[test]
    fn test_credential_kind_dispatch_rule() {
        // Session tokens always contain dots, API tokens never do.
        let api_token = crate::security::generate_api_token();
        assert!(!api_token.contains('.'));
        let jwt_shaped = "eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiJ4In0.c2ln";
        assert!(jwt_shaped.contains('.'));
    }
}

//! User management, restricted to owners and admins. Only an owner may
//! touch owner accounts or grant the owner role.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use diesel::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::blocking;
use crate::api::tenants::{validate_email, validate_password};
use crate::auth::AuthContext;
use crate::error::{AppError, AppResult};
use crate::security::hash_password;
use crate::shared::models::{User, UserRole};
use crate::shared::state::AppState;
use crate::shared::utils::utc_now;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: String,
    pub role: Option<UserRole>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub display_name: Option<String>,
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
}

/// Owner-level changes (accounts holding the owner role, or grants of it)
/// require an owner caller.
fn require_owner_for(auth: &AuthContext, touched_role: UserRole) -> AppResult<()> {
    if touched_role == UserRole::Owner && auth.role != UserRole::Owner {
        return Err(AppError::forbidden("Only the owner can manage owner users"));
    }
    Ok(())
}

fn get_or_404(
    conn: &mut diesel::PgConnection,
    user_id: Uuid,
    tenant_id: Uuid,
) -> AppResult<User> {
    use crate::shared::schema::users::dsl;
    dsl::users
        .filter(dsl::id.eq(user_id))
        .filter(dsl::tenant_id.eq(tenant_id))
        .first::<User>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("User not found"))
}

/// POST /v1/users
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(body): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    auth.require_admin()?;
    validate_email(&body.email)?;
    validate_password(&body.password)?;

    let role = body.role.unwrap_or(UserRole::Member);
    require_owner_for(&auth, role)?;

    let password_hash = hash_password(&body.password)
        .map_err(|e| AppError::internal(format!("password hashing failed: {}", e)))?;

    let user = blocking(&state, move |conn| {
        use crate::shared::schema::users::dsl;

        let existing: Option<Uuid> = dsl::users
            .filter(dsl::tenant_id.eq(auth.tenant_id))
            .filter(dsl::email.eq(&body.email))
            .select(dsl::id)
            .first(conn)
            .optional()?;
        if existing.is_some() {
            return Err(AppError::conflict(
                "A user with this email already exists in this tenant",
            ));
        }

        let now = utc_now();
        let user = User {
            id: Uuid::new_v4(),
            tenant_id: auth.tenant_id,
            email: body.email,
            password_hash,
            display_name: body.display_name,
            role: role.as_str().to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(dsl::users)
            .values(&user)
            .execute(conn)?;
        Ok(user)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /v1/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> AppResult<Json<Vec<User>>> {
    auth.require_admin()?;
    let users = blocking(&state, move |conn| {
        use crate::shared::schema::users::dsl;
        let rows = dsl::users
            .filter(dsl::tenant_id.eq(auth.tenant_id))
            .order(dsl::email.asc())
            .load::<User>(conn)?;
        Ok(rows)
    })
    .await?;
    Ok(Json(users))
}

/// GET /v1/users/{id}
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<User>> {
    auth.require_admin()?;
    let user = blocking(&state, move |conn| get_or_404(conn, user_id, auth.tenant_id)).await?;
    Ok(Json(user))
}

/// PATCH /v1/users/{id}
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(body): Json<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    auth.require_admin()?;
    if let Some(email) = body.email.as_deref() {
        validate_email(email)?;
    }
    if let Some(password) = body.password.as_deref() {
        validate_password(password)?;
    }
    if let Some(role) = body.role {
        require_owner_for(&auth, role)?;
    }

    let new_hash = match body.password.as_deref() {
        Some(password) => Some(
            hash_password(password)
                .map_err(|e| AppError::internal(format!("password hashing failed: {}", e)))?,
        ),
        None => None,
    };

    let caller = auth.clone();
    let user = blocking(&state, move |conn| {
        use crate::shared::schema::users::dsl;
        let mut user = get_or_404(conn, user_id, caller.tenant_id)?;

        let current_role =
            UserRole::parse(&user.role).unwrap_or(UserRole::Member);
        require_owner_for(&caller, current_role)?;

        if let Some(email) = body.email {
            user.email = email;
        }
        if let Some(display_name) = body.display_name {
            user.display_name = display_name;
        }
        if let Some(role) = body.role {
            user.role = role.as_str().to_string();
        }
        if let Some(hash) = new_hash {
            user.password_hash = hash;
        }
        if let Some(is_active) = body.is_active {
            user.is_active = is_active;
        }
        user.updated_at = utc_now();

        diesel::update(dsl::users.filter(dsl::id.eq(user.id)))
            .set((
                dsl::email.eq(&user.email),
                dsl::display_name.eq(&user.display_name),
                dsl::role.eq(&user.role),
                dsl::password_hash.eq(&user.password_hash),
                dsl::is_active.eq(user.is_active),
                dsl::updated_at.eq(user.updated_at),
            ))
            .execute(conn)?;
        Ok(user)
    })
    .await?;

    Ok(Json(user))
}

/// DELETE /v1/users/{id}. Deactivation rather than removal; the account can
/// no longer authenticate.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    auth.require_admin()?;

    let caller = auth.clone();
    blocking(&state, move |conn| {
        use crate::shared::schema::users::dsl;
        let user = get_or_404(conn, user_id, caller.tenant_id)?;
        let role = UserRole::parse(&user.role).unwrap_or(UserRole::Member);
        require_owner_for(&caller, role)?;

        diesel::update(dsl::users.filter(dsl::id.eq(user.id)))
            .set((dsl::is_active.eq(false), dsl::updated_at.eq(utc_now())))
            .execute(conn)?;
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: UserRole) -> AuthContext {
        AuthContext {
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            role,
            token_id: None,
        }
    }

    #[test]
    fn test_admin_cannot_touch_owner() {
        assert!(require_owner_for(&ctx(UserRole::Admin), UserRole::Owner).is_err());
        assert!(require_owner_for(&ctx(UserRole::Owner), UserRole::Owner).is_ok());
    }

    #[test]
    fn test_admin_can_touch_members() {
        assert!(require_owner_for(&ctx(UserRole::Admin), UserRole::Member).is_ok());
        assert!(require_owner_for(&ctx(UserRole::Admin), UserRole::Admin).is_ok());
    }
}

//! Webhook CRUD and test pings.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::blocking;
use crate::auth::AuthContext;
use crate::error::{AppError, AppResult};
use crate::security::generate_api_token;
use crate::shared::models::{Webhook, WEBHOOK_EVENTS};
use crate::shared::state::AppState;
use crate::shared::utils::utc_now;
use crate::webhooks::deliver;

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub events: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// Optional caller-chosen secret; generated when omitted
    pub secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookRead {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub url: String,
    pub events: Vec<String>,
    pub description: String,
    pub is_active: bool,
    pub has_secret: bool,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

impl From<&Webhook> for WebhookRead {
    fn from(wh: &Webhook) -> Self {
        Self {
            id: wh.id,
            tenant_id: wh.tenant_id,
            url: wh.url.clone(),
            events: wh.event_list(),
            description: wh.description.clone(),
            is_active: wh.is_active,
            has_secret: !wh.secret.is_empty(),
            created_at: wh.created_at,
            updated_at: wh.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookCreatedResponse {
    #[serde(flatten)]
    pub webhook: WebhookRead,
    /// Shown once; store it securely
    pub secret: String,
}

#[derive(Debug, Serialize)]
pub struct TestPingResponse {
    pub success: bool,
    pub status_code: Option<u16>,
}

fn validate_events(events: &[String]) -> AppResult<()> {
    if events.is_empty() {
        return Err(AppError::invalid("At least one event type is required"));
    }
    for event in events {
        if !WEBHOOK_EVENTS.contains(&event.as_str()) {
            return Err(AppError::invalid(format!(
                "Invalid event type: {}. Valid: {}",
                event,
                WEBHOOK_EVENTS.join(", ")
            )));
        }
    }
    Ok(())
}

fn validate_url(url: &str) -> AppResult<()> {
    if url.len() > 2048 || !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(AppError::invalid("url must be an http(s) address"));
    }
    Ok(())
}

/// POST /v1/webhooks
pub async fn create_webhook(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(body): Json<CreateWebhookRequest>,
) -> AppResult<(StatusCode, Json<WebhookCreatedResponse>)> {
    validate_events(&body.events)?;
    validate_url(&body.url)?;

    let secret = body.secret.filter(|s| !s.is_empty()).unwrap_or_else(generate_api_token);
    let secret_for_response = secret.clone();

    let webhook = blocking(&state, move |conn| {
        use crate::shared::schema::webhooks::dsl;
        let now = utc_now();
        let webhook = Webhook {
            id: Uuid::new_v4(),
            tenant_id: auth.tenant_id,
            url: body.url,
            secret,
            events: serde_json::to_string(&body.events)
                .map_err(|e| AppError::internal(format!("event serialization failed: {}", e)))?,
            description: body.description,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(dsl::webhooks)
            .values(&webhook)
            .execute(conn)?;
        Ok(webhook)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(WebhookCreatedResponse {
            webhook: WebhookRead::from(&webhook),
            secret: secret_for_response,
        }),
    ))
}

/// GET /v1/webhooks
pub async fn list_webhooks(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> AppResult<Json<Vec<WebhookRead>>> {
    let webhooks = blocking(&state, move |conn| {
        use crate::shared::schema::webhooks::dsl;
        let rows = dsl::webhooks
            .filter(dsl::tenant_id.eq(auth.tenant_id))
            .order(dsl::created_at.desc())
            .load::<Webhook>(conn)?;
        Ok(rows)
    })
    .await?;
    Ok(Json(webhooks.iter().map(WebhookRead::from).collect()))
}

fn get_or_404(
    conn: &mut diesel::PgConnection,
    webhook_id: Uuid,
    tenant_id: Uuid,
) -> AppResult<Webhook> {
    use crate::shared::schema::webhooks::dsl;
    dsl::webhooks
        .filter(dsl::id.eq(webhook_id))
        .filter(dsl::tenant_id.eq(tenant_id))
        .first::<Webhook>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Webhook not found"))
}

/// GET /v1/webhooks/{id}
pub async fn get_webhook(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(webhook_id): Path<Uuid>,
) -> AppResult<Json<WebhookRead>> {
    let webhook =
        blocking(&state, move |conn| get_or_404(conn, webhook_id, auth.tenant_id)).await?;
    Ok(Json(WebhookRead::from(&webhook)))
}

/// DELETE /v1/webhooks/{id}
pub async fn delete_webhook(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(webhook_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    blocking(&state, move |conn| {
        use crate::shared::schema::webhooks::dsl;
        let deleted = diesel::delete(
            dsl::webhooks
                .filter(dsl::id.eq(webhook_id))
                .filter(dsl::tenant_id.eq(auth.tenant_id)),
        )
        .execute(conn)?;
        if deleted == 0 {
            return Err(AppError::not_found("Webhook not found"));
        }
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/webhooks/{id}/test. Sends a signed ping so receivers can check
/// their signature verification end to end.
pub async fn test_webhook(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(webhook_id): Path<Uuid>,
) -> AppResult<Json<TestPingResponse>> {
    let webhook =
        blocking(&state, move |conn| get_or_404(conn, webhook_id, auth.tenant_id)).await?;

    let payload = json!({
        "event": "test.ping",
        "webhook_id": webhook.id.to_string(),
    });
    match deliver(&state.http, &webhook.url, &webhook.secret, "test.ping", &payload).await {
        Ok(status) => Ok(Json(TestPingResponse {
            success: status.is_success(),
            status_code: Some(status.as_u16()),
        })),
        Err(_) => Ok(Json(TestPingResponse {
            success: false,
            status_code: None,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_validation() {
        assert!(validate_events(&["source.ingested".into()]).is_ok());
        assert!(validate_events(&["chat.message".into(), "source.failed".into()]).is_ok());
        assert!(validate_events(&["nonsense.event".into()]).is_err());
        assert!(validate_events(&[]).is_err());
    }

    #[test]
    fn test_url_validation() {
        assert!(validate_url("https://example.com/hook").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url(&format!("https://e.com/{}", "a".repeat(2048))).is_err());
    }
}

//! HTTP gateway: route table, CORS, and the blocking-query helper shared
//! by every resource module.

pub mod api_tokens;
pub mod auth_routes;
pub mod bot_profiles;
pub mod chat;
pub mod sources;
pub mod stats;
pub mod system;
pub mod tenants;
pub mod users;
pub mod webhooks;

use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use diesel::PgConnection;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::error::AppResult;
use crate::shared::state::AppState;

/// Run a diesel closure on the blocking pool with a pooled connection.
pub(crate) async fn blocking<T, F>(state: &Arc<AppState>, f: F) -> AppResult<T>
where
    F: FnOnce(&mut PgConnection) -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = state.conn.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await?
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state);

    let v1 = Router::new()
        // tenants
        .route("/tenants", post(tenants::bootstrap_tenant))
        .route("/tenants/me", get(tenants::current_tenant))
        // auth
        .route("/auth/login", post(auth_routes::login))
        .route("/auth/me", get(auth_routes::me))
        // api tokens
        .route(
            "/api-tokens",
            post(api_tokens::create_token).get(api_tokens::list_tokens),
        )
        .route("/api-tokens/:id", delete(api_tokens::revoke_token))
        // bot profiles
        .route(
            "/bot-profiles",
            post(bot_profiles::create_profile).get(bot_profiles::list_profiles),
        )
        .route(
            "/bot-profiles/:id",
            get(bot_profiles::get_profile)
                .patch(bot_profiles::update_profile)
                .delete(bot_profiles::delete_profile),
        )
        // sources
        .route(
            "/sources",
            post(sources::create_source).get(sources::list_sources),
        )
        .route("/sources/upload", post(sources::upload_source))
        .route("/sources/batch", post(sources::create_batch))
        .route(
            "/sources/:id",
            get(sources::get_source)
                .patch(sources::update_source)
                .delete(sources::delete_source),
        )
        .route("/sources/:id/children", get(sources::list_children))
        .route("/sources/:id/ingest", post(sources::trigger_ingest))
        .route(
            "/sources/:id/ingest-children",
            post(sources::trigger_ingest_children),
        )
        // chat
        .route("/chat", post(chat::send_message).get(chat::list_chats))
        .route("/chat/export", get(chat::export_chats))
        .route("/chat/:id", get(chat::get_chat))
        .route("/chat/:id/messages", get(chat::get_chat_messages))
        .route("/chat/:id/export", get(chat::export_chat))
        .route(
            "/chat/:id/messages/:mid/feedback",
            patch(chat::submit_feedback),
        )
        // webhooks
        .route(
            "/webhooks",
            post(webhooks::create_webhook).get(webhooks::list_webhooks),
        )
        .route(
            "/webhooks/:id",
            get(webhooks::get_webhook).delete(webhooks::delete_webhook),
        )
        .route("/webhooks/:id/test", post(webhooks::test_webhook))
        // stats
        .route("/stats/overview", get(stats::overview))
        .route("/stats/usage", get(stats::usage))
        .route("/stats/cost", get(stats::cost))
        .route("/stats/feedback", get(stats::feedback))
        .route("/stats/pricing", get(stats::pricing))
        // users
        .route("/users", post(users::create_user).get(users::list_users))
        .route(
            "/users/:id",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        // system
        .route("/system/health", get(system::health));

    Router::new()
        .nest("/v1", v1)
        // Uploads go up to 10 MB; leave headroom for multipart framing.
        .layer(DefaultBodyLimit::max(12 * 1024 * 1024))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let origins = &state.config.allowed_origins;
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse::<HeaderValue>().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}

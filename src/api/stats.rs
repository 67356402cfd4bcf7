//! Tenant analytics: overview, daily usage, cost, feedback, pricing.
//!
//! Responses are cached in-process for 30 seconds per (metric, tenant,
//! params); aggregate queries use raw SQL where diesel's DSL gets in the
//! way of date grouping.

use axum::extract::State;
use axum::Json;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Date, Text};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::blocking;
use crate::auth::AuthContext;
use crate::error::AppResult;
use crate::shared::state::AppState;
use crate::stats::cache::StatsCache;
use crate::stats::pricing::{cost as model_cost, MODEL_PRICING};

#[derive(QueryableByName)]
struct DailyUsageRow {
    #[diesel(sql_type = Date)]
    date: chrono::NaiveDate,
    #[diesel(sql_type = Text)]
    model: String,
    #[diesel(sql_type = BigInt)]
    prompt_tokens: i64,
    #[diesel(sql_type = BigInt)]
    completion_tokens: i64,
    #[diesel(sql_type = BigInt)]
    request_count: i64,
}

#[derive(QueryableByName)]
struct ModelUsageRow {
    #[diesel(sql_type = Text)]
    model: String,
    #[diesel(sql_type = BigInt)]
    prompt_tokens: i64,
    #[diesel(sql_type = BigInt)]
    completion_tokens: i64,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

async fn cached<F, Fut>(
    state: &Arc<AppState>,
    metric: &str,
    auth: &AuthContext,
    compute: F,
) -> AppResult<Json<Value>>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = AppResult<Value>>,
{
    let key = StatsCache::key(metric, auth.tenant_id, "");
    if let Some(hit) = state.stats_cache.get(&key) {
        return Ok(Json(hit));
    }
    let value = compute().await?;
    state.stats_cache.put(&key, value.clone());
    Ok(Json(value))
}

/// GET /v1/stats/overview
pub async fn overview(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> AppResult<Json<Value>> {
    let state_for_compute = state.clone();
    let tenant_id = auth.tenant_id;
    cached(&state, "overview", &auth, move || async move {
        blocking(&state_for_compute, move |conn| {
            use crate::shared::schema::{bot_profiles, chats, sources, usage_events};
            use diesel::dsl::sum;

            let bot_count: i64 = bot_profiles::dsl::bot_profiles
                .filter(bot_profiles::dsl::tenant_id.eq(tenant_id))
                .count()
                .get_result(conn)?;
            let source_count: i64 = sources::dsl::sources
                .filter(sources::dsl::tenant_id.eq(tenant_id))
                .count()
                .get_result(conn)?;
            let chat_count: i64 = chats::dsl::chats
                .filter(chats::dsl::tenant_id.eq(tenant_id))
                .count()
                .get_result(conn)?;

            let prompt_sum: Option<i64> = usage_events::dsl::usage_events
                .filter(usage_events::dsl::tenant_id.eq(tenant_id))
                .select(sum(usage_events::dsl::prompt_tokens))
                .get_result(conn)?;
            let completion_sum: Option<i64> = usage_events::dsl::usage_events
                .filter(usage_events::dsl::tenant_id.eq(tenant_id))
                .select(sum(usage_events::dsl::completion_tokens))
                .get_result(conn)?;

            let prompt = prompt_sum.unwrap_or(0);
            let completion = completion_sum.unwrap_or(0);
            Ok(json!({
                "bot_profiles": bot_count,
                "sources": source_count,
                "chats": chat_count,
                "total_prompt_tokens": prompt,
                "total_completion_tokens": completion,
                "total_tokens": prompt + completion,
            }))
        })
        .await
    })
    .await
}

/// GET /v1/stats/usage
pub async fn usage(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> AppResult<Json<Value>> {
    let state_for_compute = state.clone();
    let tenant_id = auth.tenant_id;
    cached(&state, "usage", &auth, move || async move {
        blocking(&state_for_compute, move |conn| {
            let rows: Vec<DailyUsageRow> = diesel::sql_query(
                "SELECT created_at::date AS date, model, \
                 COALESCE(SUM(prompt_tokens), 0)::bigint AS prompt_tokens, \
                 COALESCE(SUM(completion_tokens), 0)::bigint AS completion_tokens, \
                 COUNT(*)::bigint AS request_count \
                 FROM usage_events WHERE tenant_id = $1 \
                 GROUP BY created_at::date, model \
                 ORDER BY created_at::date DESC",
            )
            .bind::<diesel::sql_types::Uuid, _>(tenant_id)
            .load(conn)?;

            let usage: Vec<Value> = rows
                .iter()
                .map(|row| {
                    json!({
                        "date": row.date.to_string(),
                        "model": row.model,
                        "prompt_tokens": row.prompt_tokens,
                        "completion_tokens": row.completion_tokens,
                        "total_tokens": row.prompt_tokens + row.completion_tokens,
                        "request_count": row.request_count,
                    })
                })
                .collect();
            Ok(json!(usage))
        })
        .await
    })
    .await
}

/// GET /v1/stats/cost
pub async fn cost(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> AppResult<Json<Value>> {
    let state_for_compute = state.clone();
    let tenant_id = auth.tenant_id;
    cached(&state, "cost", &auth, move || async move {
        blocking(&state_for_compute, move |conn| {
            let rows: Vec<ModelUsageRow> = diesel::sql_query(
                "SELECT model, \
                 COALESCE(SUM(prompt_tokens), 0)::bigint AS prompt_tokens, \
                 COALESCE(SUM(completion_tokens), 0)::bigint AS completion_tokens \
                 FROM usage_events WHERE tenant_id = $1 GROUP BY model",
            )
            .bind::<diesel::sql_types::Uuid, _>(tenant_id)
            .load(conn)?;

            let mut total = 0.0f64;
            let mut any_unpriced = false;
            let models: Vec<Value> = rows
                .iter()
                .map(|row| {
                    let breakdown =
                        model_cost(&row.model, row.prompt_tokens, row.completion_tokens);
                    total += breakdown.cost_usd;
                    any_unpriced |= !breakdown.priced;
                    json!({
                        "model": row.model,
                        "prompt_tokens": row.prompt_tokens,
                        "completion_tokens": row.completion_tokens,
                        "cost_usd": breakdown.cost_usd,
                        "priced": breakdown.priced,
                    })
                })
                .collect();

            Ok(json!({
                "models": models,
                "total_cost_usd": total,
                "contains_unpriced_models": any_unpriced,
            }))
        })
        .await
    })
    .await
}

/// GET /v1/stats/feedback
pub async fn feedback(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> AppResult<Json<Value>> {
    let state_for_compute = state.clone();
    let tenant_id = auth.tenant_id;
    cached(&state, "feedback", &auth, move || async move {
        blocking(&state_for_compute, move |conn| {
            let count_where = |conn: &mut PgConnection,
                               clause: &str|
             -> Result<i64, diesel::result::Error> {
                let row: CountRow = diesel::sql_query(format!(
                    "SELECT COUNT(*)::bigint AS count FROM messages \
                     WHERE tenant_id = $1 AND role = 'assistant' AND {}",
                    clause
                ))
                .bind::<diesel::sql_types::Uuid, _>(tenant_id)
                .get_result(conn)?;
                Ok(row.count)
            };

            let positive = count_where(conn, "feedback = 'positive'")?;
            let negative = count_where(conn, "feedback = 'negative'")?;
            let unrated = count_where(conn, "feedback IS NULL")?;

            Ok(json!({
                "positive": positive,
                "negative": negative,
                "unrated": unrated,
                "total": positive + negative + unrated,
            }))
        })
        .await
    })
    .await
}

/// GET /v1/stats/pricing. The static table, for the dashboard.
pub async fn pricing(State(_state): State<Arc<AppState>>, _auth: AuthContext) -> Json<Value> {
    let models: Vec<Value> = MODEL_PRICING
        .iter()
        .map(|(model, input, output)| {
            json!({
                "model": model,
                "input_per_1k": input,
                "output_per_1k": output,
            })
        })
        .collect();
    Json(json!({ "models": models }))
}

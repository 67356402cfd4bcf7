//! Chat endpoints: the RAG interaction point, history, export, feedback.
//!
//! `POST /v1/chat` runs a full turn. With `stream=true` the response is an
//! SSE stream of `sources`, `delta`, and `done` events; the assistant
//! message and usage are persisted after the stream settles, including on
//! client disconnect (whatever content was delivered so far is saved).

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use diesel::prelude::*;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::api::blocking;
use crate::auth::AuthContext;
use crate::error::{AppError, AppResult};
use crate::llm::{ChatMessage, CompletionParams, StreamDelta};
use crate::orchestrator::{
    bot_api_key, build_messages, persist_assistant_turn, retrieve_context, RetrievedChunk,
    StreamEvent, TurnRecord, TurnUsage,
};
use crate::shared::models::{BotProfile, Chat, Message, MessageRole};
use crate::shared::state::AppState;
use crate::shared::utils::{estimate_token_count, utc_now};
use crate::webhooks;

const MAX_MESSAGE_LEN: usize = 32_000;
const MAX_TITLE_LEN: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub bot_profile_id: Uuid,
    pub message: String,
    /// Existing chat session; omit to start a new conversation
    pub chat_id: Option<Uuid>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListChatsQuery {
    pub bot_profile_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SourceRef {
    pub chunk_id: Uuid,
    pub content: String,
    pub score: f32,
    pub source_id: Option<String>,
}

impl From<&RetrievedChunk> for SourceRef {
    fn from(chunk: &RetrievedChunk) -> Self {
        Self {
            chunk_id: chunk.chunk_id,
            content: chunk.content.chars().take(200).collect(),
            score: (chunk.score * 10_000.0).round() / 10_000.0,
            source_id: chunk.source_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatMessageResponse {
    pub chat_id: Uuid,
    pub message: Message,
    pub sources: Vec<SourceRef>,
    pub usage: TurnUsage,
}

/// GET /v1/chat
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Query(query): Query<ListChatsQuery>,
) -> AppResult<Json<Vec<Chat>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let chats = blocking(&state, move |conn| {
        use crate::shared::schema::chats::dsl;
        let mut stmt = dsl::chats
            .filter(dsl::tenant_id.eq(auth.tenant_id))
            .into_boxed();
        if let Some(bot_profile_id) = query.bot_profile_id {
            stmt = stmt.filter(dsl::bot_profile_id.eq(bot_profile_id));
        }
        let rows = stmt
            .order(dsl::created_at.desc())
            .limit(limit)
            .offset(offset)
            .load::<Chat>(conn)?;
        Ok(rows)
    })
    .await?;
    Ok(Json(chats))
}

/// POST /v1/chat
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(body): Json<ChatRequest>,
) -> AppResult<Response> {
    if body.message.is_empty() || body.message.len() > MAX_MESSAGE_LEN {
        return Err(AppError::invalid(format!(
            "Message must be 1-{} characters",
            MAX_MESSAGE_LEN
        )));
    }

    // Shared setup: bot, chat session, history, persisted user message.
    let message = body.message.clone();
    let requested_chat = body.chat_id;
    let bot_profile_id = body.bot_profile_id;
    let (bot, chat, history) = blocking(&state, move |conn| {
        use crate::shared::schema::{bot_profiles, chats, messages};

        let bot = bot_profiles::dsl::bot_profiles
            .filter(bot_profiles::dsl::id.eq(bot_profile_id))
            .filter(bot_profiles::dsl::tenant_id.eq(auth.tenant_id))
            .filter(bot_profiles::dsl::is_active.eq(true))
            .first::<BotProfile>(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("Bot profile not found or inactive"))?;

        let now = utc_now();
        let chat = match requested_chat {
            Some(chat_id) => chats::dsl::chats
                .filter(chats::dsl::id.eq(chat_id))
                .filter(chats::dsl::tenant_id.eq(auth.tenant_id))
                .first::<Chat>(conn)
                .optional()?
                .ok_or_else(|| AppError::not_found("Chat session not found"))?,
            None => {
                let chat = Chat {
                    id: Uuid::new_v4(),
                    tenant_id: auth.tenant_id,
                    bot_profile_id: bot.id,
                    user_id: auth.user_id,
                    title: message.chars().take(MAX_TITLE_LEN).collect(),
                    message_count: 0,
                    total_prompt_tokens: 0,
                    total_completion_tokens: 0,
                    created_at: now,
                    updated_at: now,
                };
                diesel::insert_into(chats::dsl::chats)
                    .values(&chat)
                    .execute(conn)?;
                chat
            }
        };

        let history: Vec<(String, String)> = messages::dsl::messages
            .filter(messages::dsl::chat_id.eq(chat.id))
            .filter(messages::dsl::tenant_id.eq(auth.tenant_id))
            .filter(messages::dsl::role.ne(MessageRole::System.as_str()))
            .order(messages::dsl::created_at.asc())
            .load::<Message>(conn)?
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect();

        diesel::insert_into(messages::dsl::messages)
            .values(&Message {
                id: Uuid::new_v4(),
                tenant_id: auth.tenant_id,
                chat_id: chat.id,
                role: MessageRole::User.as_str().to_string(),
                content: message,
                prompt_tokens: 0,
                completion_tokens: 0,
                context_chunks: "[]".to_string(),
                feedback: None,
                created_at: now,
                updated_at: now,
            })
            .execute(conn)?;

        Ok((bot, chat, history))
    })
    .await?;

    let api_key = bot_api_key(&state, &bot);

    // Retrieval happens before the response starts in both modes, so
    // retrieval failures surface as plain HTTP errors while the user
    // message stays persisted.
    let retrieved = retrieve_context(
        &state,
        auth.tenant_id,
        &bot,
        &body.message,
        api_key.as_deref(),
    )
    .await?;

    let llm_messages = build_messages(&bot.system_prompt, &retrieved, &history, &body.message);
    let params = CompletionParams {
        temperature: bot.temperature,
        max_tokens: bot.max_tokens,
    };

    if body.stream {
        Ok(stream_response(
            state, auth, bot, chat, retrieved, llm_messages, params, api_key,
        ))
    } else {
        let response =
            complete_response(state, auth, bot, chat, retrieved, llm_messages, params, api_key)
                .await?;
        Ok(response)
    }
}

#[allow(clippy::too_many_arguments)]
async fn complete_response(
    state: Arc<AppState>,
    auth: AuthContext,
    bot: BotProfile,
    chat: Chat,
    retrieved: Vec<RetrievedChunk>,
    llm_messages: Vec<ChatMessage>,
    params: CompletionParams,
    api_key: Option<String>,
) -> AppResult<Response> {
    let provider = state.llm.provider_for(&bot.model);
    let completion = provider
        .complete(&bot.model, &llm_messages, &params, api_key.as_deref())
        .await?;

    let sources: Vec<SourceRef> = retrieved.iter().map(Into::into).collect();
    let context_chunks: Vec<Uuid> = retrieved.iter().map(|c| c.chunk_id).collect();

    let message_id = persist_assistant_turn(
        &state,
        TurnRecord {
            tenant_id: auth.tenant_id,
            chat_id: chat.id,
            bot_profile_id: bot.id,
            content: completion.content.clone(),
            context_chunks,
            model: bot.model.clone(),
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
            is_stream: false,
            time_to_first_token_ms: None,
            stream_duration_ms: None,
        },
    )
    .await?;

    webhooks::dispatch(
        state.conn.clone(),
        auth.tenant_id,
        "chat.message",
        json!({
            "chat_id": chat.id.to_string(),
            "message_id": message_id.to_string(),
            "bot_profile_id": bot.id.to_string(),
        }),
    );

    let message = fetch_message(&state, message_id, auth.tenant_id).await?;
    Ok(Json(ChatMessageResponse {
        chat_id: chat.id,
        message,
        sources,
        usage: TurnUsage {
            model: bot.model,
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
        },
    })
    .into_response())
}

#[allow(clippy::too_many_arguments)]
fn stream_response(
    state: Arc<AppState>,
    auth: AuthContext,
    bot: BotProfile,
    chat: Chat,
    retrieved: Vec<RetrievedChunk>,
    llm_messages: Vec<ChatMessage>,
    params: CompletionParams,
    api_key: Option<String>,
) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(100);

    tokio::spawn(async move {
        run_stream_turn(state, auth, bot, chat, retrieved, llm_messages, params, api_key, tx)
            .await;
    });

    let sse = Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );
    let mut response = sse.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    response.headers_mut().insert(
        header::HeaderName::from_static("x-accel-buffering"),
        header::HeaderValue::from_static("no"),
    );
    response
}

async fn send_event(tx: &mpsc::Sender<Result<Event, Infallible>>, event: &StreamEvent) -> bool {
    match event.to_sse_event() {
        Ok(sse) => tx.send(Ok(sse)).await.is_ok(),
        Err(e) => {
            error!("failed to serialize stream event: {}", e);
            false
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_stream_turn(
    state: Arc<AppState>,
    auth: AuthContext,
    bot: BotProfile,
    chat: Chat,
    retrieved: Vec<RetrievedChunk>,
    llm_messages: Vec<ChatMessage>,
    params: CompletionParams,
    api_key: Option<String>,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    let mut client_connected = send_event(
        &tx,
        &StreamEvent::Sources {
            sources: retrieved.clone(),
        },
    )
    .await;

    let (delta_tx, mut delta_rx) = mpsc::channel::<StreamDelta>(100);
    let provider = state.llm.provider_for(&bot.model);
    let model = bot.model.clone();
    let messages_for_provider = llm_messages.clone();
    let key = api_key.clone();
    let provider_task = tokio::spawn(async move {
        provider
            .complete_stream(
                &model,
                &messages_for_provider,
                &params,
                key.as_deref(),
                delta_tx,
            )
            .await
    });

    let started = Instant::now();
    let mut first_token_ms: Option<i64> = None;
    let mut assistant_content = String::new();
    let mut usage: Option<(i32, i32)> = None;

    while let Some(delta) = delta_rx.recv().await {
        match delta {
            StreamDelta::Content(content) => {
                if first_token_ms.is_none() {
                    first_token_ms = Some(started.elapsed().as_millis() as i64);
                }
                assistant_content.push_str(&content);
                if client_connected {
                    client_connected = send_event(&tx, &StreamEvent::Delta { content }).await;
                    if !client_connected {
                        // Client disconnected: stop reading, which closes the
                        // delta channel and makes the provider stream abort.
                        info!("chat stream client disconnected, aborting provider stream");
                        break;
                    }
                }
            }
            StreamDelta::Done {
                prompt_tokens,
                completion_tokens,
            } => {
                usage = Some((prompt_tokens, completion_tokens));
            }
        }
    }
    drop(delta_rx);

    let stream_failed = match provider_task.await {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            warn!("provider stream failed mid-turn: {}", e);
            true
        }
        Err(e) => {
            error!("provider stream task panicked: {}", e);
            true
        }
    };
    let stream_duration_ms = started.elapsed().as_millis() as i64;

    // Whatever was delivered gets persisted, even after disconnect or a
    // mid-stream provider failure.
    let (prompt_tokens, completion_tokens) = usage.unwrap_or_else(|| {
        let prompt_text: String = llm_messages.iter().map(|m| m.content.clone()).collect();
        (
            estimate_token_count(&prompt_text) as i32,
            estimate_token_count(&assistant_content) as i32,
        )
    });

    let context_chunks: Vec<Uuid> = retrieved.iter().map(|c| c.chunk_id).collect();
    let persisted = persist_assistant_turn(
        &state,
        TurnRecord {
            tenant_id: auth.tenant_id,
            chat_id: chat.id,
            bot_profile_id: bot.id,
            content: assistant_content,
            context_chunks,
            model: bot.model.clone(),
            prompt_tokens,
            completion_tokens,
            is_stream: true,
            time_to_first_token_ms: first_token_ms,
            stream_duration_ms: Some(stream_duration_ms),
        },
    )
    .await;

    match persisted {
        Ok(message_id) => {
            if stream_failed {
                if client_connected {
                    send_event(
                        &tx,
                        &StreamEvent::Error {
                            detail: "An error occurred during generation.".to_string(),
                        },
                    )
                    .await;
                }
            } else if client_connected {
                send_event(
                    &tx,
                    &StreamEvent::Done {
                        chat_id: chat.id,
                        message_id,
                        usage: TurnUsage {
                            model: bot.model.clone(),
                            prompt_tokens,
                            completion_tokens,
                        },
                    },
                )
                .await;
            }
            webhooks::dispatch(
                state.conn.clone(),
                auth.tenant_id,
                "chat.message",
                json!({
                    "chat_id": chat.id.to_string(),
                    "message_id": message_id.to_string(),
                    "bot_profile_id": bot.id.to_string(),
                }),
            );
        }
        Err(e) => {
            error!("failed to persist streamed assistant message: {}", e);
            if client_connected {
                send_event(
                    &tx,
                    &StreamEvent::Error {
                        detail: "Failed to save the response.".to_string(),
                    },
                )
                .await;
            }
        }
    }
}

async fn fetch_message(
    state: &Arc<AppState>,
    message_id: Uuid,
    tenant_id: Uuid,
) -> AppResult<Message> {
    blocking(state, move |conn| {
        use crate::shared::schema::messages::dsl;
        dsl::messages
            .filter(dsl::id.eq(message_id))
            .filter(dsl::tenant_id.eq(tenant_id))
            .first::<Message>(conn)
            .optional()?
            .ok_or_else(|| AppError::internal("persisted message disappeared"))
    })
    .await
}

fn get_chat_scoped(
    conn: &mut diesel::PgConnection,
    chat_id: Uuid,
    tenant_id: Uuid,
) -> AppResult<Chat> {
    use crate::shared::schema::chats::dsl;
    dsl::chats
        .filter(dsl::id.eq(chat_id))
        .filter(dsl::tenant_id.eq(tenant_id))
        .first::<Chat>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Chat session not found"))
}

fn load_messages(
    conn: &mut diesel::PgConnection,
    chat_id: Uuid,
    tenant_id: Uuid,
) -> AppResult<Vec<Message>> {
    use crate::shared::schema::messages::dsl;
    Ok(dsl::messages
        .filter(dsl::chat_id.eq(chat_id))
        .filter(dsl::tenant_id.eq(tenant_id))
        .order(dsl::created_at.asc())
        .load::<Message>(conn)?)
}

/// GET /v1/chat/{id}
pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(chat_id): Path<Uuid>,
) -> AppResult<Json<Chat>> {
    let chat = blocking(&state, move |conn| {
        get_chat_scoped(conn, chat_id, auth.tenant_id)
    })
    .await?;
    Ok(Json(chat))
}

/// GET /v1/chat/{id}/messages
pub async fn get_chat_messages(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(chat_id): Path<Uuid>,
) -> AppResult<Json<Vec<Message>>> {
    let messages = blocking(&state, move |conn| {
        get_chat_scoped(conn, chat_id, auth.tenant_id)?;
        load_messages(conn, chat_id, auth.tenant_id)
    })
    .await?;
    Ok(Json(messages))
}

// ── Export ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
    pub bot_profile_id: Option<Uuid>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub limit: Option<i64>,
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn messages_csv(rows: &[(Chat, Vec<Message>)]) -> String {
    let mut out = String::from(
        "chat_id,chat_title,message_id,role,content,feedback,prompt_tokens,completion_tokens,created_at\n",
    );
    for (chat, messages) in rows {
        for msg in messages {
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{},{}\n",
                chat.id,
                csv_escape(&chat.title),
                msg.id,
                msg.role,
                csv_escape(&msg.content),
                msg.feedback.as_deref().unwrap_or(""),
                msg.prompt_tokens,
                msg.completion_tokens,
                msg.created_at,
            ));
        }
    }
    out
}

fn csv_response(body: String, filename: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", filename),
            ),
        ],
        body,
    )
        .into_response()
}

/// GET /v1/chat/export
pub async fn export_chats(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Query(query): Query<ExportQuery>,
) -> AppResult<Response> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let from_date = parse_date(query.from_date.as_deref())?;
    let to_date = parse_date(query.to_date.as_deref())?;
    let bot_profile_id = query.bot_profile_id;

    let rows = blocking(&state, move |conn| {
        use crate::shared::schema::chats::dsl;
        let mut stmt = dsl::chats
            .filter(dsl::tenant_id.eq(auth.tenant_id))
            .into_boxed();
        if let Some(bot_id) = bot_profile_id {
            stmt = stmt.filter(dsl::bot_profile_id.eq(bot_id));
        }
        if let Some(from) = from_date {
            stmt = stmt.filter(dsl::created_at.ge(from.and_time(chrono::NaiveTime::MIN)));
        }
        if let Some(to) = to_date {
            let end = to.succ_opt().unwrap_or(to).and_time(chrono::NaiveTime::MIN);
            stmt = stmt.filter(dsl::created_at.lt(end));
        }
        let chats = stmt
            .order(dsl::created_at.desc())
            .limit(limit)
            .load::<Chat>(conn)?;

        let mut rows = Vec::with_capacity(chats.len());
        for chat in chats {
            let messages = load_messages(conn, chat.id, auth.tenant_id)?;
            rows.push((chat, messages));
        }
        Ok(rows)
    })
    .await?;

    if query.format.as_deref() == Some("csv") {
        return Ok(csv_response(messages_csv(&rows), "chats_export.csv"));
    }

    let chats_json: Vec<serde_json::Value> = rows
        .iter()
        .map(|(chat, messages)| json!({ "chat": chat, "messages": messages }))
        .collect();
    Ok(Json(json!({
        "chats": chats_json,
        "exported_at": utc_now().to_string(),
    }))
    .into_response())
}

/// GET /v1/chat/{id}/export
pub async fn export_chat(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> AppResult<Response> {
    let (chat, messages) = blocking(&state, move |conn| {
        let chat = get_chat_scoped(conn, chat_id, auth.tenant_id)?;
        let messages = load_messages(conn, chat_id, auth.tenant_id)?;
        Ok((chat, messages))
    })
    .await?;

    if query.format.as_deref() == Some("csv") {
        let rows = vec![(chat, messages)];
        let filename = format!("chat_{}.csv", chat_id);
        return Ok(csv_response(messages_csv(&rows), &filename));
    }

    Ok(Json(json!({
        "chat": chat,
        "messages": messages,
        "exported_at": utc_now().to_string(),
    }))
    .into_response())
}

fn parse_date(value: Option<&str>) -> AppResult<Option<chrono::NaiveDate>> {
    match value {
        None => Ok(None),
        Some(raw) => chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| AppError::invalid("Dates must be YYYY-MM-DD")),
    }
}

// ── Feedback ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub feedback: Option<String>,
}

/// PATCH /v1/chat/{id}/messages/{mid}/feedback. Feedback applies only to
/// assistant messages; null clears it.
pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((chat_id, message_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<FeedbackRequest>,
) -> AppResult<Json<Message>> {
    if let Some(value) = body.feedback.as_deref() {
        if value != "positive" && value != "negative" {
            return Err(AppError::invalid(
                "feedback must be \"positive\", \"negative\", or null",
            ));
        }
    }

    let message = blocking(&state, move |conn| {
        use crate::shared::schema::messages::dsl;
        get_chat_scoped(conn, chat_id, auth.tenant_id)?;

        let msg = dsl::messages
            .filter(dsl::id.eq(message_id))
            .filter(dsl::chat_id.eq(chat_id))
            .filter(dsl::tenant_id.eq(auth.tenant_id))
            .first::<Message>(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("Message not found"))?;

        if msg.role != MessageRole::Assistant.as_str() {
            return Err(AppError::invalid(
                "Feedback can only be set on assistant messages",
            ));
        }

        diesel::update(dsl::messages.filter(dsl::id.eq(message_id)))
            .set((
                dsl::feedback.eq(body.feedback.clone()),
                dsl::updated_at.eq(utc_now()),
            ))
            .execute(conn)?;

        Ok(Message {
            feedback: body.feedback.clone(),
            ..msg
        })
    })
    .await?;

    Ok(Json(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn test_source_ref_truncation() {
        let chunk = RetrievedChunk {
            chunk_id: Uuid::new_v4(),
            content: "x".repeat(500),
            score: 0.876_543,
            source_id: None,
        };
        let source_ref = SourceRef::from(&chunk);
        assert_eq!(source_ref.content.len(), 200);
        assert!((source_ref.score - 0.8765).abs() < 1e-6);
    }

    #[test]
    fn test_parse_date() {
        assert!(parse_date(Some("2026-01-31")).unwrap().is_some());
        assert!(parse_date(None).unwrap().is_none());
        assert!(parse_date(Some("31/01/2026")).is_err());
    }
}

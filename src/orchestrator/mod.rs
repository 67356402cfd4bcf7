//! RAG orchestration: retrieval, prompt assembly, LLM invocation, and
//! persistence of completed turns.
//!
//! The HTTP layer owns request parsing and the SSE connection; everything
//! between "we have an authenticated chat turn" and "the assistant message
//! is saved" lives here.

use axum::response::sse::Event;
use diesel::prelude::*;
use log::warn;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::llm::ChatMessage;
use crate::shared::models::{BotProfile, Message, MessageRole, UsageEvent};
use crate::shared::state::AppState;
use crate::shared::utils::utc_now;

/// Maximum context chunks to retrieve per turn
pub const DEFAULT_TOP_K: usize = 5;
/// Maximum conversation turns (user + assistant pairs) included as history
pub const MAX_HISTORY_TURNS: usize = 10;

/// A chunk retrieved from vector search, kept for the response payload and
/// for `Message.context_chunks`.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: Uuid,
    pub content: String,
    pub score: f32,
    pub source_id: Option<String>,
}

/// Token usage for one turn, echoed in responses and SSE done events.
#[derive(Debug, Clone, Serialize)]
pub struct TurnUsage {
    pub model: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}

/// Events produced while streaming a chat turn, serialized to SSE frames
/// by the HTTP layer.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Sources {
        sources: Vec<RetrievedChunk>,
    },
    Delta {
        content: String,
    },
    Done {
        chat_id: Uuid,
        message_id: Uuid,
        usage: TurnUsage,
    },
    Error {
        detail: String,
    },
}

impl StreamEvent {
    pub fn to_sse_event(&self) -> Result<Event, serde_json::Error> {
        let (name, data) = match self {
            StreamEvent::Sources { sources } => {
                ("sources", serde_json::to_string(&json!({ "sources": sources }))?)
            }
            StreamEvent::Delta { content } => {
                ("delta", serde_json::to_string(&json!({ "content": content }))?)
            }
            StreamEvent::Done {
                chat_id,
                message_id,
                usage,
            } => (
                "done",
                serde_json::to_string(&json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "usage": usage,
                }))?,
            ),
            StreamEvent::Error { detail } => {
                ("error", serde_json::to_string(&json!({ "detail": detail }))?)
            }
        };
        Ok(Event::default().event(name).data(data))
    }
}

/// Embed the user message and run the tenant/bot scoped vector search.
pub async fn retrieve_context(
    state: &Arc<AppState>,
    tenant_id: Uuid,
    bot: &BotProfile,
    user_message: &str,
    api_key: Option<&str>,
) -> AppResult<Vec<RetrievedChunk>> {
    let embedding_model = state.llm.default_embedding_model.clone();
    let provider = state.llm.provider_for(&embedding_model);
    let vectors = provider
        .embed(&embedding_model, &[user_message.to_string()], api_key)
        .await?;
    let Some(query_vector) = vectors.into_iter().next() else {
        return Ok(Vec::new());
    };

    let hits = state
        .vector
        .search(tenant_id, bot.id, &query_vector, DEFAULT_TOP_K)
        .await
        .map_err(|e| AppError::upstream(format!("vector search failed: {}", e)))?;

    Ok(hits
        .into_iter()
        .map(|hit| RetrievedChunk {
            chunk_id: hit.chunk_id,
            content: hit.payload["content"].as_str().unwrap_or("").to_string(),
            score: hit.score,
            source_id: hit.payload["source_id"].as_str().map(str::to_string),
        })
        .collect())
}

/// Assemble the message list: system prompt with the retrieval block,
/// truncated history, then the user message.
pub fn build_messages(
    system_prompt: &str,
    retrieved: &[RetrievedChunk],
    history: &[(String, String)],
    user_message: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);

    let system_content = if retrieved.is_empty() {
        system_prompt.to_string()
    } else {
        let numbered: Vec<String> = retrieved
            .iter()
            .enumerate()
            .map(|(i, chunk)| format!("[{}] {}", i + 1, chunk.content))
            .collect();
        format!(
            "{}\n\n---\nRelevant context from the knowledge base:\n{}\n---\nUse the context above to answer the user's question.",
            system_prompt,
            numbered.join("\n")
        )
    };
    messages.push(ChatMessage::new("system", system_content));

    let start = history.len().saturating_sub(MAX_HISTORY_TURNS * 2);
    for (role, content) in &history[start..] {
        messages.push(ChatMessage::new(role, content.clone()));
    }

    messages.push(ChatMessage::new("user", user_message));
    messages
}

/// Everything persisted when a turn completes.
pub struct TurnRecord {
    pub tenant_id: Uuid,
    pub chat_id: Uuid,
    pub bot_profile_id: Uuid,
    pub content: String,
    pub context_chunks: Vec<Uuid>,
    pub model: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub is_stream: bool,
    pub time_to_first_token_ms: Option<i64>,
    pub stream_duration_ms: Option<i64>,
}

/// Persist the assistant message, its usage event, and the chat counters in
/// a single transaction. Returns the new message id.
pub async fn persist_assistant_turn(
    state: &Arc<AppState>,
    record: TurnRecord,
) -> AppResult<Uuid> {
    let pool = state.conn.clone();
    tokio::task::spawn_blocking(move || -> AppResult<Uuid> {
        use crate::shared::schema::{chats, messages, usage_events};
        let mut conn = pool.get()?;
        let now = utc_now();
        let message_id = Uuid::new_v4();

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::insert_into(messages::dsl::messages)
                .values(&Message {
                    id: message_id,
                    tenant_id: record.tenant_id,
                    chat_id: record.chat_id,
                    role: MessageRole::Assistant.as_str().to_string(),
                    content: record.content.clone(),
                    prompt_tokens: record.prompt_tokens,
                    completion_tokens: record.completion_tokens,
                    context_chunks: serde_json::to_string(&record.context_chunks)
                        .unwrap_or_else(|_| "[]".to_string()),
                    feedback: None,
                    created_at: now,
                    updated_at: now,
                })
                .execute(conn)?;

            diesel::insert_into(usage_events::dsl::usage_events)
                .values(&UsageEvent {
                    id: Uuid::new_v4(),
                    tenant_id: record.tenant_id,
                    chat_id: record.chat_id,
                    message_id,
                    bot_profile_id: record.bot_profile_id,
                    model: record.model.clone(),
                    prompt_tokens: record.prompt_tokens,
                    completion_tokens: record.completion_tokens,
                    is_stream: record.is_stream,
                    time_to_first_token_ms: record.time_to_first_token_ms,
                    stream_duration_ms: record.stream_duration_ms,
                    created_at: now,
                    updated_at: now,
                })
                .execute(conn)?;

            diesel::update(chats::dsl::chats.filter(chats::dsl::id.eq(record.chat_id)))
                .set((
                    chats::dsl::message_count.eq(chats::dsl::message_count + 2),
                    chats::dsl::total_prompt_tokens
                        .eq(chats::dsl::total_prompt_tokens + record.prompt_tokens as i64),
                    chats::dsl::total_completion_tokens
                        .eq(chats::dsl::total_completion_tokens
                            + record.completion_tokens as i64),
                    chats::dsl::updated_at.eq(now),
                ))
                .execute(conn)?;

            Ok(())
        })?;

        Ok(message_id)
    })
    .await?
}

/// Decrypt the per-bot provider key, if any. Never logs the key material.
pub fn bot_api_key(state: &Arc<AppState>, bot: &BotProfile) -> Option<String> {
    let encrypted = bot.encrypted_credentials.as_deref()?;
    match state.cipher.decrypt_value(encrypted) {
        Ok(plain) => match serde_json::from_str::<serde_json::Value>(&plain) {
            Ok(creds) => creds["api_key"].as_str().map(str::to_string),
            Err(_) => {
                warn!("bot {} credentials are not valid JSON", bot.id);
                None
            }
        },
        Err(_) => {
            warn!("bot {} credentials failed to decrypt", bot.id);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: Uuid::new_v4(),
            content: content.to_string(),
            score,
            source_id: None,
        }
    }

    #[test]
    fn test_build_messages_without_context() {
        let messages = build_messages("Be helpful.", &[], &[], "Hi");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, "Be helpful.");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "Hi");
    }

    #[test]
    fn test_build_messages_context_block() {
        let retrieved = vec![chunk("First fact.", 0.9), chunk("Second fact.", 0.8)];
        let messages = build_messages("Be helpful.", &retrieved, &[], "Question?");
        let system = &messages[0].content;
        assert!(system.starts_with("Be helpful."));
        assert!(system.contains("Relevant context from the knowledge base:"));
        assert!(system.contains("[1] First fact."));
        assert!(system.contains("[2] Second fact."));
        assert!(system.contains("Use the context above to answer the user's question."));
    }

    #[test]
    fn test_build_messages_truncates_history() {
        let history: Vec<(String, String)> = (0..30)
            .map(|i| {
                let role = if i % 2 == 0 { "user" } else { "assistant" };
                (role.to_string(), format!("message {}", i))
            })
            .collect();
        let messages = build_messages("sys", &[], &history, "latest");
        // system + 20 history + user
        assert_eq!(messages.len(), 22);
        assert_eq!(messages[1].content, "message 10");
        assert_eq!(messages[21].content, "latest");
    }

    #[test]
    fn test_sse_event_formats() {
        let sources = StreamEvent::Sources {
            sources: vec![chunk("ctx", 0.87)],
        };
        assert!(sources.to_sse_event().is_ok());

        let delta = StreamEvent::Delta {
            content: "Hello".into(),
        };
        assert!(delta.to_sse_event().is_ok());

        let done = StreamEvent::Done {
            chat_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            usage: TurnUsage {
                model: "gpt-4o-mini".into(),
                prompt_tokens: 10,
                completion_tokens: 20,
            },
        };
        assert!(done.to_sse_event().is_ok());

        let error = StreamEvent::Error {
            detail: "boom".into(),
        };
        assert!(error.to_sse_event().is_ok());
    }
}

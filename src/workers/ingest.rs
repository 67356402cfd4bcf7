//! Ingestion worker: turns a Source into a Document, Chunks, and vectors.
//!
//! The handler is idempotent on (source_id): every run replaces the
//! source's previous document, chunk rows, and vectors wholesale, so
//! at-least-once delivery and concurrent re-runs converge on the last
//! committed run.

use anyhow::{anyhow, bail, Context, Result};
use diesel::prelude::*;
use log::{error, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::kb::chunking::{Chunker, TextChunk};
use crate::kb::extract::html_to_text;
use crate::llm::MAX_EMBED_BATCH;
use crate::queue::parse_ingest_args;
use crate::shared::models::{Chunk, Document, Source, SourceStatus, SourceType};
use crate::shared::state::AppState;
use crate::shared::utils::utc_now;
use crate::vector_db::{chunk_payload, VectorPoint};
use crate::webhooks;

const URL_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "MiniRAG/1.0";
const MAX_ERROR_LEN: usize = 2000;

/// Job handler for `ingest_source`. Pipeline failures mark the source as
/// errored and consume the job; only infrastructure failures (the error
/// row itself cannot be written) bubble up for a retry.
pub async fn ingest_source(state: Arc<AppState>, args: Value) -> Result<()> {
    let (source_id, tenant_id) =
        parse_ingest_args(&args).ok_or_else(|| anyhow!("malformed ingest args: {}", args))?;

    let Some(source) = load_source(&state, source_id, tenant_id).await? else {
        info!(
            "ingest skipped: source {} not found or inactive for tenant {}",
            source_id, tenant_id
        );
        return Ok(());
    };

    mark_processing(&state, source_id, tenant_id).await?;

    match run_pipeline(&state, &source).await {
        Ok((document_count, chunk_count)) => {
            info!(
                "ingested source {}: {} document, {} chunks",
                source_id, document_count, chunk_count
            );
            webhooks::dispatch(
                state.conn.clone(),
                tenant_id,
                "source.ingested",
                serde_json::json!({
                    "source_id": source_id.to_string(),
                    "source_name": source.name,
                    "document_count": document_count,
                    "chunk_count": chunk_count,
                }),
            );
            Ok(())
        }
        Err(err) => {
            let message: String = err.to_string().chars().take(MAX_ERROR_LEN).collect();
            error!("ingestion failed for source {}: {}", source_id, message);
            mark_error(&state, source_id, tenant_id, &message).await?;
            webhooks::dispatch(
                state.conn.clone(),
                tenant_id,
                "source.failed",
                serde_json::json!({
                    "source_id": source_id.to_string(),
                    "error": message,
                }),
            );
            Ok(())
        }
    }
}

async fn run_pipeline(state: &Arc<AppState>, source: &Source) -> Result<(i32, i32)> {
    // 1. Extract
    let raw_content = extract_content(state, source).await?;
    if raw_content.trim().is_empty() {
        bail!("No content to ingest");
    }

    // 2. Chunk
    let chunks = Chunker::default().chunk_text(&raw_content);
    if chunks.is_empty() {
        bail!("Chunking produced no output");
    }

    // 3. Embed, batched, order preserved
    let embeddings = embed_chunks(state, &chunks).await?;

    // 4. Replace the old vector set before inserting the new one
    state
        .vector
        .delete_by_source(source.tenant_id, source.id)
        .await
        .map_err(|e| anyhow!("vector delete failed: {}", e))?;

    // 5. Replace document and chunk rows in one transaction
    let document_id = Uuid::new_v4();
    let chunk_rows: Vec<Chunk> = chunks
        .iter()
        .map(|tc| {
            let chunk_id = Uuid::new_v4();
            Chunk {
                id: chunk_id,
                tenant_id: source.tenant_id,
                document_id,
                source_id: source.id,
                bot_profile_id: source.bot_profile_id,
                ordinal: tc.ordinal,
                content: tc.content.clone(),
                vector_id: chunk_id,
                created_at: utc_now(),
                updated_at: utc_now(),
            }
        })
        .collect();

    replace_rows(state, source, &raw_content, document_id, chunk_rows.clone()).await?;

    // 6. Upsert vectors, chunk id doubling as vector id
    let points: Vec<VectorPoint> = chunk_rows
        .iter()
        .zip(embeddings)
        .map(|(row, vector)| VectorPoint {
            id: row.vector_id,
            vector,
            payload: chunk_payload(
                row.tenant_id,
                row.bot_profile_id,
                row.source_id,
                row.document_id,
                row.id,
                row.ordinal,
                &row.content,
            ),
        })
        .collect();
    state
        .vector
        .upsert(&points)
        .await
        .map_err(|e| anyhow!("vector upsert failed: {}", e))?;

    // 7. Finalize
    let chunk_count = chunk_rows.len() as i32;
    mark_ready(state, source.id, source.tenant_id, 1, chunk_count).await?;
    Ok((1, chunk_count))
}

async fn extract_content(state: &Arc<AppState>, source: &Source) -> Result<String> {
    match SourceType::parse(&source.source_type) {
        Some(SourceType::Text) | Some(SourceType::Upload) => {
            // Upload content is extracted at upload time
            Ok(source.content.clone().unwrap_or_default())
        }
        Some(SourceType::Url) => {
            let url = source_url(source).ok_or_else(|| anyhow!("Source has no URL"))?;
            let response = state
                .http
                .get(&url)
                .timeout(URL_FETCH_TIMEOUT)
                .header("User-Agent", USER_AGENT)
                .send()
                .await
                .with_context(|| format!("Failed to fetch {}", url))?;
            if !response.status().is_success() {
                bail!("Fetch of {} returned HTTP {}", url, response.status());
            }
            let body = response.text().await.context("Failed to read response body")?;
            Ok(html_to_text(&body))
        }
        None => bail!("Unknown source type: {}", source.source_type),
    }
}

/// URL sources keep the address in `content`; older rows may carry it in
/// the config JSON instead.
fn source_url(source: &Source) -> Option<String> {
    if let Some(content) = source.content.as_deref() {
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    let config: Value = serde_json::from_str(&source.config).ok()?;
    config["url"].as_str().map(str::to_string)
}

async fn embed_chunks(state: &Arc<AppState>, chunks: &[TextChunk]) -> Result<Vec<Vec<f32>>> {
    let model = state.llm.default_embedding_model.clone();
    let provider = state.llm.provider_for(&model);
    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

    let mut embeddings = Vec::with_capacity(texts.len());
    for batch in texts.chunks(MAX_EMBED_BATCH) {
        let batch_vectors = provider
            .embed(&model, batch, None)
            .await
            .map_err(|e| anyhow!("embedding batch failed: {}", e))?;
        embeddings.extend(batch_vectors);
    }
    Ok(embeddings)
}

async fn load_source(
    state: &Arc<AppState>,
    source_id: Uuid,
    tenant_id: Uuid,
) -> Result<Option<Source>> {
    let pool = state.conn.clone();
    tokio::task::spawn_blocking(move || -> Result<Option<Source>> {
        use crate::shared::schema::sources::dsl;
        let mut conn = pool.get()?;
        let source = dsl::sources
            .filter(dsl::id.eq(source_id))
            .filter(dsl::tenant_id.eq(tenant_id))
            .filter(dsl::is_active.eq(true))
            .first::<Source>(&mut conn)
            .optional()?;
        Ok(source)
    })
    .await?
}

async fn mark_processing(state: &Arc<AppState>, source_id: Uuid, tenant_id: Uuid) -> Result<()> {
    let pool = state.conn.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        use crate::shared::schema::sources::dsl;
        let mut conn = pool.get()?;
        diesel::update(
            dsl::sources
                .filter(dsl::id.eq(source_id))
                .filter(dsl::tenant_id.eq(tenant_id)),
        )
        .set((
            dsl::status.eq(SourceStatus::Processing.as_str()),
            dsl::last_error.eq(None::<String>),
            dsl::updated_at.eq(utc_now()),
        ))
        .execute(&mut conn)?;
        Ok(())
    })
    .await?
}

async fn replace_rows(
    state: &Arc<AppState>,
    source: &Source,
    raw_content: &str,
    document_id: Uuid,
    chunk_rows: Vec<Chunk>,
) -> Result<()> {
    let pool = state.conn.clone();
    let source_id = source.id;
    let tenant_id = source.tenant_id;
    let title = source.name.clone();
    let content = raw_content.to_string();

    tokio::task::spawn_blocking(move || -> Result<()> {
        use crate::shared::schema::{chunks, documents};
        let mut conn = pool.get()?;
        let now = utc_now();

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            // Prior runs' rows go away in the same transaction that writes
            // the replacement set.
            diesel::delete(chunks::dsl::chunks.filter(chunks::dsl::source_id.eq(source_id)))
                .execute(conn)?;
            diesel::delete(
                documents::dsl::documents.filter(documents::dsl::source_id.eq(source_id)),
            )
            .execute(conn)?;

            let char_count = content.chars().count() as i32;
            diesel::insert_into(documents::dsl::documents)
                .values(&Document {
                    id: document_id,
                    tenant_id,
                    source_id,
                    title,
                    content,
                    char_count,
                    created_at: now,
                    updated_at: now,
                })
                .execute(conn)?;

            for batch in chunk_rows.chunks(256) {
                diesel::insert_into(chunks::dsl::chunks)
                    .values(batch)
                    .execute(conn)?;
            }
            Ok(())
        })?;
        Ok(())
    })
    .await?
}

async fn mark_ready(
    state: &Arc<AppState>,
    source_id: Uuid,
    tenant_id: Uuid,
    document_count: i32,
    chunk_count: i32,
) -> Result<()> {
    let pool = state.conn.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        use crate::shared::schema::sources::dsl;
        let mut conn = pool.get()?;
        diesel::update(
            dsl::sources
                .filter(dsl::id.eq(source_id))
                .filter(dsl::tenant_id.eq(tenant_id)),
        )
        .set((
            dsl::status.eq(SourceStatus::Ready.as_str()),
            dsl::document_count.eq(document_count),
            dsl::chunk_count.eq(chunk_count),
            dsl::last_error.eq(None::<String>),
            dsl::last_refreshed_at.eq(Some(utc_now())),
            dsl::updated_at.eq(utc_now()),
        ))
        .execute(&mut conn)?;
        Ok(())
    })
    .await?
}

async fn mark_error(
    state: &Arc<AppState>,
    source_id: Uuid,
    tenant_id: Uuid,
    message: &str,
) -> Result<()> {
    let pool = state.conn.clone();
    let message = message.to_string();
    tokio::task::spawn_blocking(move || -> Result<()> {
        use crate::shared::schema::sources::dsl;
        let mut conn = pool.get()?;
        diesel::update(
            dsl::sources
                .filter(dsl::id.eq(source_id))
                .filter(dsl::tenant_id.eq(tenant_id)),
        )
        .set((
            dsl::status.eq(SourceStatus::Error.as_str()),
            dsl::last_error.eq(Some(message)),
            dsl::updated_at.eq(utc_now()),
        ))
        .execute(&mut conn)?;
        Ok(())
    })
    .await
    .map_err(|e| anyhow!("failed to mark source errored: {}", e))?
    .map_err(|e| {
        warn!("failed to mark source {} errored: {}", source_id, e);
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_with(content: Option<&str>, config: &str) -> Source {
        Source {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            bot_profile_id: Uuid::new_v4(),
            parent_source_id: None,
            name: "s".into(),
            description: String::new(),
            source_type: "url".into(),
            status: "pending".into(),
            content: content.map(str::to_string),
            config: config.to_string(),
            refresh_schedule: "none".into(),
            last_refreshed_at: None,
            last_error: None,
            document_count: 0,
            chunk_count: 0,
            is_active: true,
            created_at: utc_now(),
            updated_at: utc_now(),
        }
    }

    #[test]
    fn test_source_url_prefers_content() {
        let src = source_with(Some("https://a.example"), r#"{"url":"https://b.example"}"#);
        assert_eq!(source_url(&src).as_deref(), Some("https://a.example"));
    }

    #[test]
    fn test_source_url_falls_back_to_config() {
        let src = source_with(None, r#"{"url":"https://b.example"}"#);
        assert_eq!(source_url(&src).as_deref(), Some("https://b.example"));
        let empty = source_with(Some("  "), r#"{"url":"https://b.example"}"#);
        assert_eq!(source_url(&empty).as_deref(), Some("https://b.example"));
    }

    #[test]
    fn test_source_url_missing() {
        let src = source_with(None, "{}");
        assert_eq!(source_url(&src), None);
    }
}

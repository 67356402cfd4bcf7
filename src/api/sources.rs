//! Source CRUD, upload, hierarchy, and ingestion triggers. Every query is
//! scoped to the caller's tenant; referencing another tenant's bot profile
//! or parent source is rejected as invalid input.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use diesel::prelude::*;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::blocking;
use crate::auth::AuthContext;
use crate::error::{AppError, AppResult};
use crate::kb::extract::{extract_text, is_allowed_extension, ALLOWED_EXTENSIONS, MAX_FILE_SIZE};
use crate::queue::ingest_args;
use crate::shared::models::{RefreshSchedule, Source, SourceStatus, SourceType};
use crate::shared::state::AppState;
use crate::shared::utils::utc_now;
use crate::workers::INGEST_JOB;

#[derive(Debug, Deserialize)]
pub struct CreateSourceRequest {
    pub bot_profile_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub config: Option<Value>,
    pub content: Option<String>,
    pub parent_source_id: Option<Uuid>,
    pub refresh_schedule: Option<RefreshSchedule>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSourceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub config: Option<Value>,
    pub content: Option<String>,
    pub refresh_schedule: Option<RefreshSchedule>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ListSourcesQuery {
    pub bot_profile_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub include_children: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchChildCreate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub config: Option<Value>,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchSourceRequest {
    pub bot_profile_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub children: Vec<BatchChildCreate>,
}

#[derive(Debug, Serialize)]
pub struct SourceRead {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub bot_profile_id: Uuid,
    pub parent_source_id: Option<Uuid>,
    pub name: String,
    pub description: String,
    pub source_type: String,
    pub status: String,
    pub config: Value,
    pub refresh_schedule: String,
    pub last_refreshed_at: Option<chrono::NaiveDateTime>,
    pub last_error: Option<String>,
    pub document_count: i32,
    pub chunk_count: i32,
    pub is_active: bool,
    pub children_count: usize,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct BatchSourceResponse {
    pub parent: SourceRead,
    pub children: Vec<SourceRead>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct IngestChildrenResponse {
    pub status: &'static str,
    pub message: String,
    pub enqueued: usize,
}

fn to_read(src: Source, children: &[Source]) -> SourceRead {
    let config = serde_json::from_str(&src.config).unwrap_or_else(|_| Value::Object(Default::default()));
    let (status, chunk_count) = if children.is_empty() {
        (src.status.clone(), src.chunk_count)
    } else {
        (
            aggregate_status(children).as_str().to_string(),
            children.iter().map(|c| c.chunk_count).sum(),
        )
    };
    SourceRead {
        id: src.id,
        tenant_id: src.tenant_id,
        bot_profile_id: src.bot_profile_id,
        parent_source_id: src.parent_source_id,
        name: src.name,
        description: src.description,
        source_type: src.source_type,
        status,
        config,
        refresh_schedule: src.refresh_schedule,
        last_refreshed_at: src.last_refreshed_at,
        last_error: src.last_error,
        document_count: src.document_count,
        chunk_count,
        is_active: src.is_active,
        children_count: children.len(),
        created_at: src.created_at,
        updated_at: src.updated_at,
    }
}

/// Parent status derived from children: processing dominates, then error,
/// then ready when unanimous.
fn aggregate_status(children: &[Source]) -> SourceStatus {
    let statuses: Vec<SourceStatus> = children
        .iter()
        .filter_map(|c| SourceStatus::parse(&c.status))
        .collect();
    if statuses.is_empty() {
        return SourceStatus::Pending;
    }
    if statuses.contains(&SourceStatus::Processing) {
        return SourceStatus::Processing;
    }
    if statuses.contains(&SourceStatus::Error) {
        return SourceStatus::Error;
    }
    if statuses.iter().all(|s| *s == SourceStatus::Ready) {
        return SourceStatus::Ready;
    }
    SourceStatus::Pending
}

fn get_or_404(
    conn: &mut diesel::PgConnection,
    source_id: Uuid,
    tenant_id: Uuid,
) -> AppResult<Source> {
    use crate::shared::schema::sources::dsl;
    dsl::sources
        .filter(dsl::id.eq(source_id))
        .filter(dsl::tenant_id.eq(tenant_id))
        .first::<Source>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Source not found"))
}

fn get_children(
    conn: &mut diesel::PgConnection,
    parent_id: Uuid,
    tenant_id: Uuid,
) -> AppResult<Vec<Source>> {
    use crate::shared::schema::sources::dsl;
    Ok(dsl::sources
        .filter(dsl::parent_source_id.eq(parent_id))
        .filter(dsl::tenant_id.eq(tenant_id))
        .filter(dsl::is_active.eq(true))
        .order(dsl::created_at.asc())
        .load::<Source>(conn)?)
}

/// Cross-tenant admission check: the referenced bot profile must exist
/// within the caller's tenant.
fn verify_bot_profile(
    conn: &mut diesel::PgConnection,
    bot_profile_id: Uuid,
    tenant_id: Uuid,
) -> AppResult<()> {
    use crate::shared::schema::bot_profiles::dsl;
    let found: Option<Uuid> = dsl::bot_profiles
        .filter(dsl::id.eq(bot_profile_id))
        .filter(dsl::tenant_id.eq(tenant_id))
        .select(dsl::id)
        .first(conn)
        .optional()?;
    if found.is_none() {
        return Err(AppError::invalid(
            "Bot profile not found or belongs to a different tenant",
        ));
    }
    Ok(())
}

/// Parent validation: same tenant, same bot profile, and at most one level
/// of nesting, which keeps the hierarchy acyclic by construction.
fn validate_parent(
    conn: &mut diesel::PgConnection,
    parent_id: Uuid,
    tenant_id: Uuid,
    bot_profile_id: Uuid,
) -> AppResult<Source> {
    let parent = get_or_404(conn, parent_id, tenant_id)?;
    if parent.bot_profile_id != bot_profile_id {
        return Err(AppError::invalid(
            "Parent source belongs to a different bot profile",
        ));
    }
    if parent.parent_source_id.is_some() {
        return Err(AppError::invalid("Nesting beyond one level is not allowed"));
    }
    Ok(parent)
}

fn validate_name(name: &str) -> AppResult<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(AppError::invalid("Name must be 1-255 characters"));
    }
    Ok(())
}

fn config_to_string(config: &Option<Value>) -> AppResult<String> {
    match config {
        None => Ok("{}".to_string()),
        Some(value) => {
            if !value.is_object() {
                return Err(AppError::invalid("config must be a JSON object"));
            }
            serde_json::to_string(value)
                .map_err(|e| AppError::internal(format!("config serialization failed: {}", e)))
        }
    }
}

async fn enqueue_ingest(state: &Arc<AppState>, source_id: Uuid, tenant_id: Uuid) -> AppResult<()> {
    state
        .queue
        .enqueue(INGEST_JOB, ingest_args(source_id, tenant_id))
        .await
        .map(|_| ())
        .map_err(|e| AppError::upstream(format!("failed to enqueue ingestion: {}", e)))
}

/// POST /v1/sources
pub async fn create_source(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(body): Json<CreateSourceRequest>,
) -> AppResult<(StatusCode, Json<SourceRead>)> {
    validate_name(&body.name)?;
    let config = config_to_string(&body.config)?;

    let source = blocking(&state, move |conn| {
        use crate::shared::schema::sources::dsl;
        verify_bot_profile(conn, body.bot_profile_id, auth.tenant_id)?;
        if let Some(parent_id) = body.parent_source_id {
            validate_parent(conn, parent_id, auth.tenant_id, body.bot_profile_id)?;
        }

        let now = utc_now();
        let source = Source {
            id: Uuid::new_v4(),
            tenant_id: auth.tenant_id,
            bot_profile_id: body.bot_profile_id,
            parent_source_id: body.parent_source_id,
            name: body.name,
            description: body.description,
            source_type: body.source_type.as_str().to_string(),
            status: SourceStatus::Pending.as_str().to_string(),
            content: body.content,
            config,
            refresh_schedule: body
                .refresh_schedule
                .unwrap_or(RefreshSchedule::None)
                .as_str()
                .to_string(),
            last_refreshed_at: None,
            last_error: None,
            document_count: 0,
            chunk_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(dsl::sources)
            .values(&source)
            .execute(conn)?;
        Ok(source)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(to_read(source, &[]))))
}

/// GET /v1/sources
pub async fn list_sources(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Query(query): Query<ListSourcesQuery>,
) -> AppResult<Json<Vec<SourceRead>>> {
    let reads = blocking(&state, move |conn| {
        use crate::shared::schema::sources::dsl;
        let mut stmt = dsl::sources
            .filter(dsl::tenant_id.eq(auth.tenant_id))
            .filter(dsl::is_active.eq(true))
            .into_boxed();

        if let Some(bot_profile_id) = query.bot_profile_id {
            stmt = stmt.filter(dsl::bot_profile_id.eq(bot_profile_id));
        }
        if let Some(parent_id) = query.parent_id {
            stmt = stmt.filter(dsl::parent_source_id.eq(parent_id));
        } else if !query.include_children {
            stmt = stmt.filter(dsl::parent_source_id.is_null());
        }

        let rows = stmt.order(dsl::created_at.desc()).load::<Source>(conn)?;

        let aggregate = query.parent_id.is_none() && !query.include_children;
        let mut reads = Vec::with_capacity(rows.len());
        for src in rows {
            let children = if aggregate {
                get_children(conn, src.id, auth.tenant_id)?
            } else {
                Vec::new()
            };
            reads.push(to_read(src, &children));
        }
        Ok(reads)
    })
    .await?;
    Ok(Json(reads))
}

/// GET /v1/sources/{id}
pub async fn get_source(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(source_id): Path<Uuid>,
) -> AppResult<Json<SourceRead>> {
    let read = blocking(&state, move |conn| {
        let src = get_or_404(conn, source_id, auth.tenant_id)?;
        let children = get_children(conn, src.id, auth.tenant_id)?;
        Ok(to_read(src, &children))
    })
    .await?;
    Ok(Json(read))
}

/// GET /v1/sources/{id}/children
pub async fn list_children(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(source_id): Path<Uuid>,
) -> AppResult<Json<Vec<SourceRead>>> {
    let reads = blocking(&state, move |conn| {
        get_or_404(conn, source_id, auth.tenant_id)?;
        let children = get_children(conn, source_id, auth.tenant_id)?;
        Ok(children.into_iter().map(|c| to_read(c, &[])).collect())
    })
    .await?;
    Ok(Json(reads))
}

/// POST /v1/sources/upload. Multipart file upload: text is extracted
/// immediately and ingestion is enqueued automatically.
pub async fn upload_source(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<SourceRead>)> {
    let mut file_name: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut bot_profile_id: Option<Uuid> = None;
    let mut name: Option<String> = None;
    let mut description = String::new();
    let mut parent_source_id: Option<Uuid> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::invalid(format!("malformed multipart body: {}", e)))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::invalid(format!("failed to read file: {}", e)))?;
                file_bytes = Some(bytes.to_vec());
            }
            "bot_profile_id" => {
                let text = field.text().await.unwrap_or_default();
                bot_profile_id =
                    Some(text.parse().map_err(|_| {
                        AppError::invalid("bot_profile_id must be a UUID")
                    })?);
            }
            "name" => name = Some(field.text().await.unwrap_or_default()),
            "description" => description = field.text().await.unwrap_or_default(),
            "parent_source_id" => {
                let text = field.text().await.unwrap_or_default();
                if !text.is_empty() {
                    parent_source_id = Some(text.parse().map_err(|_| {
                        AppError::invalid("parent_source_id must be a UUID")
                    })?);
                }
            }
            _ => {}
        }
    }

    let bot_profile_id =
        bot_profile_id.ok_or_else(|| AppError::invalid("bot_profile_id is required"))?;
    let file_name = file_name.ok_or_else(|| AppError::invalid("A file is required"))?;
    let file_bytes = file_bytes.ok_or_else(|| AppError::invalid("A file is required"))?;

    if !is_allowed_extension(&file_name) {
        return Err(AppError::invalid(format!(
            "Unsupported file type. Allowed: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }
    if file_bytes.len() > MAX_FILE_SIZE {
        return Err(AppError::invalid(format!(
            "File too large. Maximum size is {} MB",
            MAX_FILE_SIZE / (1024 * 1024)
        )));
    }

    let extracted = extract_text(&file_name, &file_bytes)
        .map_err(|e| AppError::invalid(format!("Extraction failed: {}", e)))?;

    let display_name = name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| file_name.clone());
    validate_name(&display_name)?;
    let config = serde_json::json!({
        "original_filename": file_name,
        "file_size": file_bytes.len(),
    });

    let source = blocking(&state, move |conn| {
        use crate::shared::schema::sources::dsl;
        verify_bot_profile(conn, bot_profile_id, auth.tenant_id)?;
        if let Some(parent_id) = parent_source_id {
            validate_parent(conn, parent_id, auth.tenant_id, bot_profile_id)?;
        }

        let now = utc_now();
        let source = Source {
            id: Uuid::new_v4(),
            tenant_id: auth.tenant_id,
            bot_profile_id,
            parent_source_id,
            name: display_name,
            description,
            source_type: SourceType::Upload.as_str().to_string(),
            status: SourceStatus::Pending.as_str().to_string(),
            content: Some(extracted),
            config: config.to_string(),
            refresh_schedule: RefreshSchedule::None.as_str().to_string(),
            last_refreshed_at: None,
            last_error: None,
            document_count: 0,
            chunk_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(dsl::sources)
            .values(&source)
            .execute(conn)?;
        Ok(source)
    })
    .await?;

    // The source exists either way; ingestion can be retriggered manually.
    if let Err(e) = enqueue_ingest(&state, source.id, auth.tenant_id).await {
        warn!("auto-ingest enqueue failed for source {}: {}", source.id, e);
    }

    Ok((StatusCode::CREATED, Json(to_read(source, &[]))))
}

/// POST /v1/sources/batch. Create a parent plus its children in one
/// transaction.
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(body): Json<BatchSourceRequest>,
) -> AppResult<(StatusCode, Json<BatchSourceResponse>)> {
    validate_name(&body.name)?;
    if body.children.is_empty() {
        return Err(AppError::invalid("At least one child source is required"));
    }
    for child in &body.children {
        validate_name(&child.name)?;
    }

    let (parent, children) = blocking(&state, move |conn| {
        use crate::shared::schema::sources::dsl;
        verify_bot_profile(conn, body.bot_profile_id, auth.tenant_id)?;

        let now = utc_now();
        let parent = Source {
            id: Uuid::new_v4(),
            tenant_id: auth.tenant_id,
            bot_profile_id: body.bot_profile_id,
            parent_source_id: None,
            name: body.name,
            description: body.description,
            source_type: SourceType::Url.as_str().to_string(),
            status: SourceStatus::Pending.as_str().to_string(),
            content: None,
            config: "{}".to_string(),
            refresh_schedule: RefreshSchedule::None.as_str().to_string(),
            last_refreshed_at: None,
            last_error: None,
            document_count: 0,
            chunk_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let mut children = Vec::with_capacity(body.children.len());
        for child in body.children {
            let config = config_to_string(&child.config)?;
            children.push(Source {
                id: Uuid::new_v4(),
                tenant_id: auth.tenant_id,
                bot_profile_id: body.bot_profile_id,
                parent_source_id: Some(parent.id),
                name: child.name,
                description: child.description,
                source_type: child.source_type.as_str().to_string(),
                status: SourceStatus::Pending.as_str().to_string(),
                content: child.content,
                config,
                refresh_schedule: RefreshSchedule::None.as_str().to_string(),
                last_refreshed_at: None,
                last_error: None,
                document_count: 0,
                chunk_count: 0,
                is_active: true,
                created_at: now,
                updated_at: now,
            });
        }

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::insert_into(dsl::sources)
                .values(&parent)
                .execute(conn)?;
            diesel::insert_into(dsl::sources)
                .values(&children)
                .execute(conn)?;
            Ok(())
        })?;

        Ok((parent, children))
    })
    .await?;

    let children_reads: Vec<SourceRead> = children
        .iter()
        .cloned()
        .map(|c| to_read(c, &[]))
        .collect();
    Ok((
        StatusCode::CREATED,
        Json(BatchSourceResponse {
            parent: to_read(parent, &children),
            children: children_reads,
        }),
    ))
}

/// PATCH /v1/sources/{id}
pub async fn update_source(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(source_id): Path<Uuid>,
    Json(body): Json<UpdateSourceRequest>,
) -> AppResult<Json<SourceRead>> {
    if let Some(name) = body.name.as_deref() {
        validate_name(name)?;
    }
    let config = match &body.config {
        Some(_) => Some(config_to_string(&body.config)?),
        None => None,
    };

    let read = blocking(&state, move |conn| {
        use crate::shared::schema::sources::dsl;
        let mut src = get_or_404(conn, source_id, auth.tenant_id)?;

        if let Some(name) = body.name {
            src.name = name;
        }
        if let Some(description) = body.description {
            src.description = description;
        }
        if let Some(config) = config {
            src.config = config;
        }
        if let Some(content) = body.content {
            src.content = Some(content);
        }
        if let Some(schedule) = body.refresh_schedule {
            src.refresh_schedule = schedule.as_str().to_string();
        }
        if let Some(is_active) = body.is_active {
            src.is_active = is_active;
        }
        src.updated_at = utc_now();

        diesel::update(dsl::sources.filter(dsl::id.eq(src.id)))
            .set((
                dsl::name.eq(&src.name),
                dsl::description.eq(&src.description),
                dsl::config.eq(&src.config),
                dsl::content.eq(src.content.clone()),
                dsl::refresh_schedule.eq(&src.refresh_schedule),
                dsl::is_active.eq(src.is_active),
                dsl::updated_at.eq(src.updated_at),
            ))
            .execute(conn)?;

        let children = get_children(conn, src.id, auth.tenant_id)?;
        Ok(to_read(src, &children))
    })
    .await?;
    Ok(Json(read))
}

/// DELETE /v1/sources/{id}. Soft delete, cascading to children.
pub async fn delete_source(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(source_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    blocking(&state, move |conn| {
        use crate::shared::schema::sources::dsl;
        let src = get_or_404(conn, source_id, auth.tenant_id)?;
        let now = utc_now();

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::update(
                dsl::sources
                    .filter(dsl::parent_source_id.eq(src.id))
                    .filter(dsl::tenant_id.eq(auth.tenant_id)),
            )
            .set((dsl::is_active.eq(false), dsl::updated_at.eq(now)))
            .execute(conn)?;

            diesel::update(dsl::sources.filter(dsl::id.eq(src.id)))
                .set((dsl::is_active.eq(false), dsl::updated_at.eq(now)))
                .execute(conn)?;
            Ok(())
        })?;
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/sources/{id}/ingest. Enqueues the job and returns 202; the
/// request path never ingests synchronously.
pub async fn trigger_ingest(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(source_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<IngestResponse>)> {
    let src = blocking(&state, move |conn| get_or_404(conn, source_id, auth.tenant_id)).await?;

    if src.status == SourceStatus::Processing.as_str() {
        return Err(AppError::conflict("Source is already being processed"));
    }

    enqueue_ingest(&state, source_id, auth.tenant_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            status: "accepted",
            message: format!("Ingestion queued for source {}", source_id),
        }),
    ))
}

/// POST /v1/sources/{id}/ingest-children
pub async fn trigger_ingest_children(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(source_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<IngestChildrenResponse>)> {
    let children = blocking(&state, move |conn| {
        get_or_404(conn, source_id, auth.tenant_id)?;
        get_children(conn, source_id, auth.tenant_id)
    })
    .await?;

    let mut enqueued = 0usize;
    for child in children {
        if child.status != SourceStatus::Processing.as_str() {
            enqueue_ingest(&state, child.id, auth.tenant_id).await?;
            enqueued += 1;
        }
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestChildrenResponse {
            status: "accepted",
            message: format!("Ingestion queued for {} child sources", enqueued),
            enqueued,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src_with_status(status: SourceStatus) -> Source {
        Source {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            bot_profile_id: Uuid::new_v4(),
            parent_source_id: None,
            name: "s".into(),
            description: String::new(),
            source_type: "text".into(),
            status: status.as_str().to_string(),
            content: None,
            config: "{}".into(),
            refresh_schedule: "none".into(),
            last_refreshed_at: None,
            last_error: None,
            document_count: 0,
            chunk_count: 4,
            is_active: true,
            created_at: utc_now(),
            updated_at: utc_now(),
        }
    }

    #[test]
    fn test_aggregate_status_processing_dominates() {
        let children = vec![
            src_with_status(SourceStatus::Ready),
            src_with_status(SourceStatus::Processing),
            src_with_status(SourceStatus::Error),
        ];
        assert_eq!(aggregate_status(&children), SourceStatus::Processing);
    }

    #[test]
    fn test_aggregate_status_error_beats_ready() {
        let children = vec![
            src_with_status(SourceStatus::Ready),
            src_with_status(SourceStatus::Error),
        ];
        assert_eq!(aggregate_status(&children), SourceStatus::Error);
    }

    #[test]
    fn test_aggregate_status_unanimous_ready() {
        let children = vec![
            src_with_status(SourceStatus::Ready),
            src_with_status(SourceStatus::Ready),
        ];
        assert_eq!(aggregate_status(&children), SourceStatus::Ready);
    }

    #[test]
    fn test_aggregate_chunk_counts_in_read() {
        let parent = src_with_status(SourceStatus::Pending);
        let children = vec![
            src_with_status(SourceStatus::Ready),
            src_with_status(SourceStatus::Ready),
        ];
        let read = to_read(parent, &children);
        assert_eq!(read.chunk_count, 8);
        assert_eq!(read.children_count, 2);
        assert_eq!(read.status, "ready");
    }
}

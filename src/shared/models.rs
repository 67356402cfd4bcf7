//! Database models and diesel-specific types
//!
//! Enum-like columns (roles, statuses, schedules) are stored as text; the
//! corresponding Rust enums live here with their conversions.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use super::schema;
pub use super::schema::{
    api_tokens, bot_profiles, chats, chunks, documents, jobs, messages, sources, tenants,
    usage_events, users, webhooks,
};

/// Roles a user can hold within a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Owner,
    Admin,
    Member,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }

    /// Admins and owners may manage users and tokens
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Text,
    Upload,
    Url,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Upload => "upload",
            Self::Url => "url",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "upload" => Some(Self::Upload),
            "url" => Some(Self::Url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Pending,
    Processing,
    Ready,
    Error,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshSchedule {
    None,
    Hourly,
    Daily,
    Weekly,
}

impl RefreshSchedule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }

    /// Refresh interval, or None for unscheduled sources
    pub fn interval(&self) -> Option<chrono::Duration> {
        match self {
            Self::None => None,
            Self::Hourly => Some(chrono::Duration::hours(1)),
            Self::Daily => Some(chrono::Duration::hours(24)),
            Self::Weekly => Some(chrono::Duration::days(7)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// Event types a webhook may subscribe to
pub const WEBHOOK_EVENTS: &[&str] = &["source.ingested", "source.failed", "chat.message"];

/// Tenant database model
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = tenants)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub plan: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// User database model
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// API token database model. The raw token never touches this table;
/// `token_hash` is its SHA-256 digest and `token_prefix` the first 8 chars.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = api_tokens)]
pub struct ApiToken {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub token_prefix: String,
    pub last_used_at: Option<NaiveDateTime>,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Bot profile database model
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = bot_profiles)]
pub struct BotProfile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub max_tokens: i32,
    #[serde(skip_serializing)]
    pub encrypted_credentials: Option<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Source database model
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = sources)]
pub struct Source {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub bot_profile_id: Uuid,
    pub parent_source_id: Option<Uuid>,
    pub name: String,
    pub description: String,
    pub source_type: String,
    pub status: String,
    pub content: Option<String>,
    pub config: String,
    pub refresh_schedule: String,
    pub last_refreshed_at: Option<NaiveDateTime>,
    pub last_error: Option<String>,
    pub document_count: i32,
    pub chunk_count: i32,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Document database model, the extracted full text of one ingest run
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub source_id: Uuid,
    pub title: String,
    pub content: String,
    pub char_count: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Chunk database model. `vector_id` equals `id` and names the point stored
/// in the vector collection.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = chunks)]
pub struct Chunk {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub document_id: Uuid,
    pub source_id: Uuid,
    pub bot_profile_id: Uuid,
    pub ordinal: i32,
    pub content: String,
    pub vector_id: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Chat database model
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = chats)]
pub struct Chat {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub bot_profile_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message_count: i32,
    pub total_prompt_tokens: i64,
    pub total_completion_tokens: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Message database model
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub chat_id: Uuid,
    pub role: String,
    pub content: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub context_chunks: String,
    pub feedback: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Usage event database model, one row per LLM invocation
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = usage_events)]
pub struct UsageEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub chat_id: Uuid,
    pub message_id: Uuid,
    pub bot_profile_id: Uuid,
    pub model: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub is_stream: bool,
    pub time_to_first_token_ms: Option<i64>,
    pub stream_duration_ms: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Webhook database model. `events` is a JSON array of event type tags.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = webhooks)]
pub struct Webhook {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub events: String,
    pub description: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Webhook {
    pub fn event_list(&self) -> Vec<String> {
        serde_json::from_str(&self.events).unwrap_or_default()
    }
}

/// Queue job database model
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_name: String,
    pub args: serde_json::Value,
    pub status: String,
    pub run_at: NaiveDateTime,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_round_trip() {
        for role in [UserRole::Owner, UserRole::Admin, UserRole::Member] {
            assert_eq!(UserRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(UserRole::parse("superuser"), None);
    }

    #[test]
    fn test_admin_check() {
        assert!(UserRole::Owner.is_admin());
        assert!(UserRole::Admin.is_admin());
        assert!(!UserRole::Member.is_admin());
    }

    #[test]
    fn test_refresh_intervals() {
        assert_eq!(RefreshSchedule::None.interval(), None);
        assert_eq!(
            RefreshSchedule::Hourly.interval(),
            Some(chrono::Duration::hours(1))
        );
        assert_eq!(
            RefreshSchedule::Weekly.interval(),
            Some(chrono::Duration::days(7))
        );
    }

    #[test]
    fn test_webhook_event_list() {
        let wh = Webhook {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            url: "https://example.com/hook".into(),
            secret: "s".into(),
            events: r#"["source.ingested","chat.message"]"#.into(),
            description: String::new(),
            is_active: true,
            created_at: chrono::Utc::now().naive_utc(),
            updated_at: chrono::Utc::now().naive_utc(),
        };
        assert_eq!(wh.event_list(), vec!["source.ingested", "chat.message"]);
    }
}

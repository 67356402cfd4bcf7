//! Application state shared by HTTP handlers and background workers.
//!
//! Everything here is constructed once at startup and immutable afterwards;
//! handlers receive it behind an `Arc`.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::ProviderRegistry;
use crate::queue::JobQueue;
use crate::security::{FieldCipher, SessionSigner};
use crate::shared::utils::DbPool;
use crate::stats::cache::StatsCache;
use crate::vector_db::VectorStore;

pub struct AppState {
    pub config: AppConfig,
    pub conn: DbPool,
    pub vector: VectorStore,
    pub llm: Arc<ProviderRegistry>,
    pub queue: Arc<JobQueue>,
    pub stats_cache: Arc<StatsCache>,
    pub cipher: FieldCipher,
    pub sessions: SessionSigner,
    /// Shared client for outbound fetches (URL sources, webhook pings)
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        conn: DbPool,
        vector: VectorStore,
        llm: Arc<ProviderRegistry>,
        queue: Arc<JobQueue>,
    ) -> Self {
        let cipher = FieldCipher::new(&config.security.encryption_key);
        let sessions = SessionSigner::new(
            &config.security.session_signing_key,
            config.security.session_expire_minutes,
        );
        Self {
            config,
            conn,
            vector,
            llm,
            queue,
            stats_cache: Arc::new(StatsCache::default()),
            cipher,
            sessions,
            http: reqwest::Client::new(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("conn", &"DbPool")
            .field("vector", &"VectorStore")
            .field("llm", &"ProviderRegistry")
            .field("queue", &"JobQueue")
            .finish_non_exhaustive()
    }
}

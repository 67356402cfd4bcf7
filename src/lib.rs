pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod kb;
pub mod llm;
pub mod orchestrator;
pub mod queue;
pub mod security;
pub mod shared;
pub mod stats;
pub mod vector_db;
pub mod webhooks;
pub mod workers;

pub use config::AppConfig;
pub use shared::state::AppState;

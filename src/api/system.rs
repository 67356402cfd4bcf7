//! Health endpoint: connectivity to the metadata store, the vector store,
//! and the job queue.

use axum::extract::State;
use axum::Json;
use diesel::prelude::*;
use serde::Serialize;
use std::sync::Arc;

use crate::api::blocking;
use crate::auth::AuthContext;
use crate::error::AppResult;
use crate::shared::state::AppState;

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ServiceHealth {
    fn ok() -> Self {
        Self {
            status: "ok",
            detail: None,
        }
    }

    fn error(detail: String) -> Self {
        Self {
            status: "error",
            detail: Some(detail.chars().take(200).collect()),
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub postgres: ServiceHealth,
    pub vector_store: ServiceHealth,
    pub queue: ServiceHealth,
}

/// GET /v1/system/health
pub async fn health(
    State(state): State<Arc<AppState>>,
    _auth: AuthContext,
) -> AppResult<Json<HealthResponse>> {
    let postgres = match blocking(&state, |conn| {
        diesel::sql_query("SELECT 1").execute(conn)?;
        Ok(())
    })
    .await
    {
        Ok(()) => ServiceHealth::ok(),
        Err(e) => ServiceHealth::error(e.to_string()),
    };

    let vector_store = match state.vector.healthz().await {
        Ok(()) => ServiceHealth::ok(),
        Err(e) => ServiceHealth::error(e.to_string()),
    };

    let queue = match state.queue.healthz().await {
        Ok(()) => ServiceHealth::ok(),
        Err(e) => ServiceHealth::error(e.to_string()),
    };

    let status = if postgres.is_ok() && vector_store.is_ok() && queue.is_ok() {
        "ok"
    } else {
        "degraded"
    };

    Ok(Json(HealthResponse {
        status,
        postgres,
        vector_store,
        queue,
    }))
}

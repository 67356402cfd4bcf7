pub mod ingest;
pub mod refresh;

use std::sync::Arc;

use crate::queue::JobQueue;

pub const INGEST_JOB: &str = "ingest_source";
pub const REFRESH_JOB: &str = "check_refresh_schedules";

/// Register every background job handler. Called once at startup before
/// the worker loop begins.
pub async fn register_handlers(queue: &Arc<JobQueue>) {
    queue.register(INGEST_JOB, ingest::ingest_source).await;
    queue
        .register(REFRESH_JOB, refresh::check_refresh_schedules)
        .await;
}

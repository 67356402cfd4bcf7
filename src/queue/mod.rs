//! Durable job queue on Postgres.
//!
//! Jobs are rows in the `jobs` table; workers claim due rows with
//! `FOR UPDATE SKIP LOCKED` so multiple worker processes can share one
//! queue. Delivery is at least once, so every handler must be idempotent
//! on its arguments. Periodic jobs are registered at startup and re-enqueue
//! themselves on an interval.

use chrono::Duration as ChronoDuration;
use diesel::prelude::*;
use log::{error, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use uuid::Uuid;

use crate::shared::models::Job;
use crate::shared::state::AppState;
use crate::shared::utils::{utc_now, DbPool};

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_DONE: &str = "done";
pub const STATUS_FAILED: &str = "failed";

const MAX_ATTEMPTS: i32 = 3;
const RETRY_DELAY_SECS: i64 = 30;

type JobHandler = Arc<
    dyn Fn(
            Arc<AppState>,
            Value,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

pub struct JobQueue {
    pool: DbPool,
    handlers: RwLock<HashMap<String, JobHandler>>,
    poll_interval: Duration,
    permits: Arc<Semaphore>,
}

impl JobQueue {
    pub fn new(pool: DbPool, poll_interval: Duration, concurrency: usize) -> Self {
        Self {
            pool,
            handlers: RwLock::new(HashMap::new()),
            poll_interval,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Register a named handler. Registration happens once at startup,
    /// before the worker loop starts.
    pub async fn register<F, Fut>(&self, job_name: &str, handler: F)
    where
        F: Fn(Arc<AppState>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: JobHandler = Arc::new(move |state, args| Box::pin(handler(state, args)));
        self.handlers
            .write()
            .await
            .insert(job_name.to_string(), handler);
    }

    /// Insert a job row. Returns the job id.
    pub async fn enqueue(&self, job_name: &str, args: Value) -> anyhow::Result<Uuid> {
        let pool = self.pool.clone();
        let job_name = job_name.to_string();
        let job_id = Uuid::new_v4();

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            use crate::shared::schema::jobs::dsl;
            let mut conn = pool.get()?;
            let now = utc_now();
            diesel::insert_into(dsl::jobs)
                .values(&Job {
                    id: job_id,
                    job_name,
                    args,
                    status: STATUS_QUEUED.to_string(),
                    run_at: now,
                    attempts: 0,
                    last_error: None,
                    created_at: now,
                    updated_at: now,
                })
                .execute(&mut conn)?;
            Ok(())
        })
        .await??;

        Ok(job_id)
    }

    /// Spawn a ticker that enqueues `job_name` every `every` interval.
    pub fn register_cron(
        self: &Arc<Self>,
        job_name: &'static str,
        args: Value,
        every: Duration,
    ) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            info!("cron registered: {} every {:?}", job_name, every);
            loop {
                tokio::time::sleep(every).await;
                if let Err(e) = queue.enqueue(job_name, args.clone()).await {
                    error!("cron enqueue of {} failed: {}", job_name, e);
                }
            }
        });
    }

    /// Start the worker loop. Claims due jobs and dispatches them to their
    /// handlers, bounded by the concurrency semaphore.
    pub fn start(self: Arc<Self>, state: Arc<AppState>) {
        tokio::spawn(async move {
            info!("job queue worker started");
            loop {
                match self.claim_batch().await {
                    Ok(jobs) => {
                        for job in jobs {
                            let permit = match Arc::clone(&self.permits).acquire_owned().await {
                                Ok(p) => p,
                                Err(_) => return,
                            };
                            let queue = Arc::clone(&self);
                            let state = Arc::clone(&state);
                            tokio::spawn(async move {
                                queue.run_job(state, job).await;
                                drop(permit);
                            });
                        }
                    }
                    Err(e) => error!("job claim failed: {}", e),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        });
    }

    async fn claim_batch(&self) -> anyhow::Result<Vec<Job>> {
        let pool = self.pool.clone();
        let limit = self.permits.available_permits().max(1) as i64;

        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Job>> {
            use crate::shared::schema::jobs::dsl;
            let mut conn = pool.get()?;
            let now = utc_now();

            let claimed = conn.transaction::<Vec<Job>, diesel::result::Error, _>(|conn| {
                let candidates: Vec<Uuid> = dsl::jobs
                    .filter(dsl::status.eq(STATUS_QUEUED))
                    .filter(dsl::run_at.le(now))
                    .order(dsl::run_at.asc())
                    .limit(limit)
                    .select(dsl::id)
                    .for_update()
                    .skip_locked()
                    .load(conn)?;

                if candidates.is_empty() {
                    return Ok(Vec::new());
                }

                diesel::update(dsl::jobs.filter(dsl::id.eq_any(&candidates)))
                    .set((
                        dsl::status.eq(STATUS_RUNNING),
                        dsl::attempts.eq(dsl::attempts + 1),
                        dsl::updated_at.eq(now),
                    ))
                    .get_results::<Job>(conn)
            })?;
            Ok(claimed)
        })
        .await?
    }

    async fn run_job(&self, state: Arc<AppState>, job: Job) {
        let handler = { self.handlers.read().await.get(&job.job_name).cloned() };
        let Some(handler) = handler else {
            warn!("no handler registered for job {}", job.job_name);
            let _ = self
                .finish_job(job.id, STATUS_FAILED, Some("no handler registered".into()))
                .await;
            return;
        };

        info!("running job {} ({})", job.id, job.job_name);
        match handler(state, job.args.clone()).await {
            Ok(()) => {
                if let Err(e) = self.finish_job(job.id, STATUS_DONE, None).await {
                    error!("failed to mark job {} done: {}", job.id, e);
                }
            }
            Err(err) => {
                let message = err.to_string();
                warn!("job {} ({}) failed: {}", job.id, job.job_name, message);
                let result = if job.attempts < MAX_ATTEMPTS {
                    self.requeue_job(job.id, message).await
                } else {
                    self.finish_job(job.id, STATUS_FAILED, Some(message)).await
                };
                if let Err(e) = result {
                    error!("failed to record job {} outcome: {}", job.id, e);
                }
            }
        }
    }

    async fn finish_job(
        &self,
        job_id: Uuid,
        status: &'static str,
        last_error: Option<String>,
    ) -> anyhow::Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            use crate::shared::schema::jobs::dsl;
            let mut conn = pool.get()?;
            diesel::update(dsl::jobs.filter(dsl::id.eq(job_id)))
                .set((
                    dsl::status.eq(status),
                    dsl::last_error.eq(last_error),
                    dsl::updated_at.eq(utc_now()),
                ))
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    async fn requeue_job(&self, job_id: Uuid, last_error: String) -> anyhow::Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            use crate::shared::schema::jobs::dsl;
            let mut conn = pool.get()?;
            let retry_at = utc_now() + ChronoDuration::seconds(RETRY_DELAY_SECS);
            diesel::update(dsl::jobs.filter(dsl::id.eq(job_id)))
                .set((
                    dsl::status.eq(STATUS_QUEUED),
                    dsl::run_at.eq(retry_at),
                    dsl::last_error.eq(Some(last_error)),
                    dsl::updated_at.eq(utc_now()),
                ))
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    /// Connectivity probe for the health endpoint.
    pub async fn healthz(&self) -> anyhow::Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            use diesel::sql_query;
            let mut conn = pool.get()?;
            sql_query("SELECT 1").execute(&mut conn)?;
            Ok(())
        })
        .await?
    }
}

/// Argument payload for `ingest_source` jobs.
pub fn ingest_args(source_id: Uuid, tenant_id: Uuid) -> Value {
    serde_json::json!({
        "source_id": source_id.to_string(),
        "tenant_id": tenant_id.to_string(),
    })
}

pub fn parse_ingest_args(args: &Value) -> Option<(Uuid, Uuid)> {
    let source_id = args["source_id"].as_str()?.parse().ok()?;
    let tenant_id = args["tenant_id"].as_str()?.parse().ok()?;
    Some((source_id, tenant_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_args_round_trip() {
        let source = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let args = ingest_args(source, tenant);
        assert_eq!(parse_ingest_args(&args), Some((source, tenant)));
    }

    #[test]
    fn test_parse_ingest_args_rejects_garbage() {
        assert_eq!(parse_ingest_args(&serde_json::json!({})), None);
        assert_eq!(
            parse_ingest_args(&serde_json::json!({"source_id": "nope", "tenant_id": "nah"})),
            None
        );
    }
}

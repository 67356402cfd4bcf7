//! Refresh scheduler: periodically re-enqueues sources whose schedule is
//! due. The scheduler only selects and enqueues; the ingestion worker does
//! the work.

use anyhow::Result;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use log::info;
use serde_json::Value;
use std::sync::Arc;

use crate::queue::ingest_args;
use crate::shared::models::{RefreshSchedule, Source, SourceStatus};
use crate::shared::state::AppState;
use crate::shared::utils::utc_now;
use crate::workers::INGEST_JOB;

/// Cron handler, registered to fire every 15 minutes.
pub async fn check_refresh_schedules(state: Arc<AppState>, _args: Value) -> Result<()> {
    let pool = state.conn.clone();
    let candidates = tokio::task::spawn_blocking(move || -> Result<Vec<Source>> {
        use crate::shared::schema::sources::dsl;
        let mut conn = pool.get()?;
        let rows = dsl::sources
            .filter(dsl::refresh_schedule.ne(RefreshSchedule::None.as_str()))
            .filter(dsl::is_active.eq(true))
            .filter(dsl::status.ne(SourceStatus::Processing.as_str()))
            .load::<Source>(&mut conn)?;
        Ok(rows)
    })
    .await??;

    let now = utc_now();
    let mut enqueued = 0usize;
    for source in candidates {
        let Some(schedule) = RefreshSchedule::parse(&source.refresh_schedule) else {
            continue;
        };
        if !is_due(schedule, source.last_refreshed_at, now) {
            continue;
        }
        state
            .queue
            .enqueue(INGEST_JOB, ingest_args(source.id, source.tenant_id))
            .await?;
        enqueued += 1;
        info!("refresh enqueued for source {}", source.id);
    }

    if enqueued > 0 {
        info!("refresh scheduler enqueued {} sources", enqueued);
    }
    Ok(())
}

/// A source is due when it has never been refreshed or its interval has
/// fully elapsed.
pub fn is_due(
    schedule: RefreshSchedule,
    last_refreshed_at: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> bool {
    let Some(interval) = schedule.interval() else {
        return false;
    };
    match last_refreshed_at {
        None => true,
        Some(last) => last + interval <= now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_none_schedule_never_due() {
        assert!(!is_due(RefreshSchedule::None, None, utc_now()));
    }

    #[test]
    fn test_never_refreshed_is_due() {
        assert!(is_due(RefreshSchedule::Hourly, None, utc_now()));
    }

    #[test]
    fn test_hourly_due_after_seventy_minutes() {
        let now = utc_now();
        let last = now - Duration::minutes(70);
        assert!(is_due(RefreshSchedule::Hourly, Some(last), now));
    }

    #[test]
    fn test_hourly_not_due_after_thirty_minutes() {
        let now = utc_now();
        let last = now - Duration::minutes(30);
        assert!(!is_due(RefreshSchedule::Hourly, Some(last), now));
    }

    #[test]
    fn test_weekly_boundary() {
        let now = utc_now();
        let just_under = now - Duration::days(7) + Duration::seconds(5);
        assert!(!is_due(RefreshSchedule::Weekly, Some(just_under), now));
        let exactly = now - Duration::days(7);
        assert!(is_due(RefreshSchedule::Weekly, Some(exactly), now));
    }
}

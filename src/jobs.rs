//! Postgres-backed outbox.
//!
//! Rows are written inside the business transaction that produced them and
//! drained by the worker binary. A job is claimed with `FOR UPDATE SKIP
//! LOCKED`, so several workers can poll the same table.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

pub const JOB_SEND_EMAIL: &str = "send-email";

pub const MAX_ATTEMPTS: i32 = 5;
const BASE_RETRY_SECONDS: u64 = 30;
/// A `processing` row untouched for this long belongs to a dead worker.
pub const PROCESSING_LEASE_SECONDS: i64 = 10 * 60;

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

/// What a handler reports back for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done,
    /// Worth another attempt later.
    Transient(String),
    Permanent(String),
}

/// Where a job ended up after [`settle_job`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Settled {
    Succeeded,
    RetryIn(Duration),
    Failed,
}

pub fn enqueue_job(conn: &mut PgConnection, job_type: &str, payload: Value) -> JobQueueResult<Job> {
    let job = diesel::insert_into(jobs::table)
        .values(&NewJob {
            id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            payload,
            status: STATUS_QUEUED.to_string(),
            run_after: Utc::now().naive_utc(),
        })
        .get_result(conn)?;
    Ok(job)
}

/// Claims the oldest runnable job of one of `job_types` and bumps its
/// attempt counter. Jobs whose `processing` lease expired are claimed
/// again, or failed once their attempts are spent.
pub fn reserve_job(conn: &mut PgConnection, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
    let now = Utc::now().naive_utc();
    let lease_cutoff = now - ChronoDuration::seconds(PROCESSING_LEASE_SECONDS);
    let reserved = conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::update(
            jobs::table
                .filter(jobs::status.eq(STATUS_PROCESSING))
                .filter(jobs::updated_at.lt(lease_cutoff))
                .filter(jobs::attempts.ge(MAX_ATTEMPTS))
                .filter(jobs::job_type.eq_any(job_types)),
        )
        .set((
            jobs::status.eq(STATUS_FAILED),
            jobs::last_error.eq("processing lease expired"),
            jobs::updated_at.eq(now),
        ))
        .execute(conn)?;

        let runnable = jobs::status
            .eq(STATUS_QUEUED)
            .and(jobs::run_after.le(now))
            .or(jobs::status
                .eq(STATUS_PROCESSING)
                .and(jobs::updated_at.lt(lease_cutoff)));
        let Some(next) = jobs::table
            .filter(runnable)
            .filter(jobs::job_type.eq_any(job_types))
            .order(jobs::run_after.asc())
            .for_update()
            .skip_locked()
            .first::<Job>(conn)
            .optional()?
        else {
            return Ok(None);
        };

        diesel::update(jobs::table.find(next.id))
            .set((
                jobs::status.eq(STATUS_PROCESSING),
                jobs::attempts.eq(jobs::attempts + 1),
                jobs::updated_at.eq(now),
            ))
            .get_result::<Job>(conn)
            .map(Some)
    })?;
    Ok(reserved)
}

/// Records the outcome of the attempt `job` was reserved for.
pub fn settle_job(
    conn: &mut PgConnection,
    job: &Job,
    outcome: &JobOutcome,
) -> JobQueueResult<Settled> {
    let now = Utc::now().naive_utc();
    let settled = settle(job.attempts, outcome);
    let (status, run_after, last_error): (&str, Option<NaiveDateTime>, Option<&str>) =
        match (settled, outcome) {
            (Settled::Succeeded, _) => (STATUS_SUCCEEDED, None, None),
            (Settled::RetryIn(delay), JobOutcome::Transient(error)) => {
                let delay = ChronoDuration::from_std(delay)
                    .unwrap_or_else(|_| ChronoDuration::seconds(BASE_RETRY_SECONDS as i64));
                (STATUS_QUEUED, Some(now + delay), Some(error.as_str()))
            }
            (_, JobOutcome::Transient(error) | JobOutcome::Permanent(error)) => {
                (STATUS_FAILED, None, Some(error.as_str()))
            }
            (_, JobOutcome::Done) => (STATUS_SUCCEEDED, None, None),
        };

    diesel::update(jobs::table.find(job.id))
        .set((
            jobs::status.eq(status),
            jobs::run_after.eq(run_after.unwrap_or(job.run_after)),
            jobs::last_error.eq(last_error),
            jobs::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(settled)
}

/// `attempts` counts the attempt that just ran.
fn settle(attempts: i32, outcome: &JobOutcome) -> Settled {
    match outcome {
        JobOutcome::Done => Settled::Succeeded,
        JobOutcome::Permanent(_) => Settled::Failed,
        JobOutcome::Transient(_) => match retry_delay(attempts) {
            Some(delay) => Settled::RetryIn(delay),
            None => Settled::Failed,
        },
    }
}

/// Delay before the next attempt, given how many attempts already ran.
/// `None` once the attempt budget is spent.
pub fn retry_delay(attempts: i32) -> Option<Duration> {
    if attempts >= MAX_ATTEMPTS {
        return None;
    }
    let exponent = attempts.clamp(0, 10) as u32;
    Some(Duration::from_secs(BASE_RETRY_SECONDS * 2u64.pow(exponent)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_until_budget_is_spent() {
        assert_eq!(retry_delay(0), Some(Duration::from_secs(30)));
        assert_eq!(retry_delay(1), Some(Duration::from_secs(60)));
        assert_eq!(retry_delay(4), Some(Duration::from_secs(480)));
        assert_eq!(retry_delay(MAX_ATTEMPTS), None);
    }

    #[test]
    fn transient_failures_retry_until_the_last_attempt() {
        let timeout = JobOutcome::Transient("timeout".into());
        assert_eq!(settle(1, &timeout), Settled::RetryIn(Duration::from_secs(60)));
        assert_eq!(settle(MAX_ATTEMPTS, &timeout), Settled::Failed);
    }

    #[test]
    fn permanent_failures_and_successes_are_final() {
        assert_eq!(settle(1, &JobOutcome::Permanent("bad address".into())), Settled::Failed);
        assert_eq!(settle(1, &JobOutcome::Done), Settled::Succeeded);
    }
}

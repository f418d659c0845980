use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    email::EmailSender,
    jobs::{reserve_job, settle_job, JobOutcome, JobQueueError, Settled},
    models::Job,
    state::AppState,
};

pub mod email;

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, job: &Job) -> JobOutcome;
}

/// Polls the outbox and hands each claimed job to the handler for its type.
pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            state,
            handlers: handlers
                .into_iter()
                .map(|handler| (handler.job_type(), handler))
                .collect(),
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!(job_types = ?self.handlers.keys().collect::<Vec<_>>(), "worker started");
        loop {
            match self.tick().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => error!(error = %err, "worker tick failed"),
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Runs at most one job. `Ok(false)` when nothing was runnable.
    pub async fn tick(&self) -> Result<bool, JobQueueError> {
        if self.handlers.is_empty() {
            return Ok(false);
        }
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();

        let Some(job) = self.with_conn(|conn| reserve_job(conn, &job_types))?.flatten() else {
            return Ok(false);
        };

        let outcome = match self.handlers.get(job.job_type.as_str()) {
            Some(handler) => handler.handle(&job).await,
            None => JobOutcome::Permanent(format!("no handler for job type {}", job.job_type)),
        };

        match self.with_conn(|conn| settle_job(conn, &job, &outcome))? {
            Some(Settled::Succeeded) => {
                debug!(job_id = %job.id, job_type = %job.job_type, "job succeeded");
            }
            Some(Settled::RetryIn(delay)) => warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                retry_in_secs = delay.as_secs(),
                ?outcome,
                "job will retry"
            ),
            Some(Settled::Failed) => error!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                ?outcome,
                "job failed"
            ),
            None => error!(
                job_id = %job.id,
                job_type = %job.job_type,
                ?outcome,
                "job outcome not recorded; it is retried once its lease expires"
            ),
        }
        Ok(true)
    }

    /// Pool errors are logged and reported as `None` so the loop keeps going.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut diesel::PgConnection) -> Result<T, JobQueueError>,
    ) -> Result<Option<T>, JobQueueError> {
        match self.state.db() {
            Ok(mut conn) => f(&mut conn).map(Some),
            Err(err) => {
                error!(error = %err, "worker could not get a database connection");
                Ok(None)
            }
        }
    }
}

pub fn default_handlers(sender: Arc<dyn EmailSender>) -> Vec<Arc<dyn JobHandler>> {
    vec![Arc::new(email::SendEmailJob::new(sender))]
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::{
    email::{EmailError, EmailMessage, EmailSender},
    jobs::{JobOutcome, JOB_SEND_EMAIL},
    models::Job,
};

use super::JobHandler;

/// Delivers one queued [`EmailMessage`].
pub struct SendEmailJob {
    sender: Arc<dyn EmailSender>,
}

impl SendEmailJob {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl JobHandler for SendEmailJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_EMAIL
    }

    async fn handle(&self, job: &Job) -> JobOutcome {
        let message: EmailMessage = match serde_json::from_value(job.payload.clone()) {
            Ok(message) => message,
            Err(err) => return JobOutcome::Permanent(format!("invalid email payload: {err}")),
        };

        match self.sender.send(&message).await {
            Ok(()) => {
                info!(job_id = %job.id, to = %message.to, subject = %message.subject, "email sent");
                JobOutcome::Done
            }
            Err(EmailError::Transient(error)) => JobOutcome::Transient(error),
            Err(EmailError::Permanent(error)) => JobOutcome::Permanent(error),
        }
    }
}

//! Outbound transactional email.
//!
//! Handlers never talk to the email provider directly. They render a
//! template and [`enqueue_email`] it in the same transaction as the write
//! that caused it; the worker binary drains the queue through an
//! [`EmailSender`].

pub mod templates;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use diesel::pg::PgConnection;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::config::AppConfig;
use crate::jobs::{enqueue_job, JobQueueResult, JOB_SEND_EMAIL};
use crate::models::Job;

/// Upper bound for one provider call, connect included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum EmailError {
    /// Worth retrying later: network failures, rate limits, provider outages.
    #[error("transient email failure: {0}")]
    Transient(String),
    #[error("email rejected: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait EmailSender: Send + Sync + 'static {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

pub fn enqueue_email(conn: &mut PgConnection, message: &EmailMessage) -> JobQueueResult<Job> {
    let payload = serde_json::to_value(message)?;
    enqueue_job(conn, JOB_SEND_EMAIL, payload)
}

pub struct HttpEmailSender {
    client: Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl HttpEmailSender {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
    ) -> reqwest::Result<Self> {
        Self::with_timeout(endpoint, api_key, from, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            from: from.into(),
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": [message.to],
                "subject": message.subject,
                "html": message.html,
            }))
            .send()
            .await
            .map_err(|err| EmailError::Transient(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, body))
    }
}

fn classify_failure(status: StatusCode, body: String) -> EmailError {
    let detail = format!("{status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        EmailError::Transient(detail)
    } else {
        EmailError::Permanent(detail)
    }
}

/// Used when no provider key is configured: logs instead of sending.
#[derive(Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            bytes = message.html.len(),
            "email delivery disabled; logging message instead"
        );
        Ok(())
    }
}

pub fn sender_from_config(config: &AppConfig) -> reqwest::Result<Arc<dyn EmailSender>> {
    let sender: Arc<dyn EmailSender> = match &config.email_api_key {
        Some(key) => Arc::new(HttpEmailSender::new(
            config.email_api_url.clone(),
            key.clone(),
            config.email_from.clone(),
        )?),
        None => Arc::new(LogEmailSender),
    };
    Ok(sender)
}

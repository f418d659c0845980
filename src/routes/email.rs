use axum::{extract::State, http::StatusCode, Json};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::admin::record_admin_action;
use crate::{
    auth::AdminUser,
    email::{enqueue_email, templates},
    error::{AppError, AppResult},
    state::AppState,
    validation::Checks,
};

#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub to: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueuedEmail {
    pub job_id: Uuid,
}

pub async fn send_email(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(payload): Json<SendEmailRequest>,
) -> AppResult<(StatusCode, Json<QueuedEmail>)> {
    let mut checks = Checks::new();
    let to = match payload.to.as_deref() {
        Some(address) => checks.email("to", address),
        None => {
            checks.fail("to", "is required");
            None
        }
    };
    let subject = checks.text("subject", payload.subject.as_deref(), 1, 200);
    let message = checks.text("message", payload.message.as_deref(), 1, 20_000);
    let (Some(to), Some(subject), Some(message)) = (to, subject, message) else {
        return Err(AppError::validation(checks.into_errors()));
    };

    let email = templates::admin_message(&subject, &message).to(&to);
    let mut conn = state.db()?;
    let job = conn.transaction::<_, AppError, _>(|conn| {
        let job = enqueue_email(conn, &email)?;
        record_admin_action(
            conn,
            admin.user_id,
            "email.send",
            "email",
            None,
            json!({ "to": to, "subject": subject, "job_id": job.id }),
        )?;
        Ok(job)
    })?;

    info!(admin_id = %admin.user_id, job_id = %job.id, "custom email queued");
    Ok((StatusCode::ACCEPTED, Json(QueuedEmail { job_id: job.id })))
}

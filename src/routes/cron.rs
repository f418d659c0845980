//! Reminder sweep triggered by an external scheduler.
//!
//! The endpoint does one pass and returns; whoever calls it decides how
//! often. Rows are claimed with `FOR UPDATE SKIP LOCKED` and stamped with
//! `reminder_sent_at`, so overlapping calls never send the same reminder
//! twice.

use std::collections::HashMap;

use axum::{extract::State, http::StatusCode, Json};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::proposals::status_counts;
use crate::{
    config::AppConfig,
    email::{enqueue_email, templates},
    error::{AppError, AppResult},
    models::{Campaign, Task},
    notify::load_contacts,
    schema::{campaigns, tasks},
    state::AppState,
    status::{CampaignStatus, ProposalStatus, TaskStatus},
    utils::time::today,
};

const TASK_LEAD_DAYS: i64 = 1;

#[derive(Debug, Default, Serialize)]
pub struct ReminderSummary {
    pub campaign_reminders: usize,
    pub task_reminders: usize,
}

pub async fn send_reminders(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> AppResult<Json<ReminderSummary>> {
    let presented = bearer.as_ref().map(|TypedHeader(Authorization(b))| b.token());
    check_cron_secret(state.config.cron_secret.as_deref(), presented)?;

    let today = today();
    let mut conn = state.db()?;
    let campaign_reminders = remind_campaign_owners(
        &mut conn,
        &state.config,
        window_end(today, state.config.reminder_lead_days),
        today,
    )?;
    let task_reminders =
        remind_task_assignees(&mut conn, &state.config, window_end(today, TASK_LEAD_DAYS), today)?;

    info!(campaign_reminders, task_reminders, "reminder sweep finished");
    Ok(Json(ReminderSummary {
        campaign_reminders,
        task_reminders,
    }))
}

fn check_cron_secret(configured: Option<&str>, presented: Option<&str>) -> AppResult<()> {
    let Some(expected) = configured.filter(|secret| !secret.is_empty()) else {
        return Err(AppError::service_unavailable(
            "reminders are disabled: CRON_SECRET is not configured",
        ));
    };
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "invalid cron credentials",
        )),
    }
}

fn window_end(today: NaiveDate, lead_days: i64) -> NaiveDate {
    today + ChronoDuration::days(lead_days.max(0))
}

fn remind_campaign_owners(
    conn: &mut PgConnection,
    config: &AppConfig,
    until: NaiveDate,
    today: NaiveDate,
) -> AppResult<usize> {
    conn.transaction::<_, AppError, _>(|conn| {
        let due: Vec<Campaign> = campaigns::table
            .filter(campaigns::status.eq(CampaignStatus::Open.as_str()))
            .filter(campaigns::reminder_sent_at.is_null())
            .filter(campaigns::deadline.ge(today))
            .filter(campaigns::deadline.le(until))
            .for_update()
            .skip_locked()
            .load(conn)?;
        if due.is_empty() {
            return Ok(0);
        }

        let owner_ids: Vec<Uuid> = due.iter().map(|c| c.organization_id).collect();
        let owners = load_contacts(conn, &owner_ids)?;
        let now = Utc::now().naive_utc();
        let mut sent = 0;

        for campaign in &due {
            let (Some(owner), Some(deadline)) =
                (owners.get(&campaign.organization_id), campaign.deadline)
            else {
                continue;
            };
            let pending = status_counts(conn, campaign.id)?
                .get(ProposalStatus::Pending.as_str())
                .copied()
                .unwrap_or(0);
            let link = config.app_link(&format!("/campaigns/{}", campaign.id));
            let email = templates::campaign_deadline_reminder(
                &owner.full_name,
                &campaign.title,
                deadline,
                pending,
                &link,
            )
            .to(&owner.email);
            enqueue_email(conn, &email)?;

            diesel::update(campaigns::table.find(campaign.id))
                .set(campaigns::reminder_sent_at.eq(now))
                .execute(conn)?;
            sent += 1;
        }
        Ok(sent)
    })
}

fn remind_task_assignees(
    conn: &mut PgConnection,
    config: &AppConfig,
    until: NaiveDate,
    today: NaiveDate,
) -> AppResult<usize> {
    conn.transaction::<_, AppError, _>(|conn| {
        let due: Vec<Task> = tasks::table
            .filter(tasks::status.ne(TaskStatus::Done.as_str()))
            .filter(tasks::assignee_id.is_not_null())
            .filter(tasks::reminder_sent_at.is_null())
            .filter(tasks::due_date.ge(today))
            .filter(tasks::due_date.le(until))
            .filter(
                tasks::campaign_id.eq_any(
                    campaigns::table
                        .filter(campaigns::status.eq(CampaignStatus::InProgress.as_str()))
                        .select(campaigns::id),
                ),
            )
            .for_update()
            .skip_locked()
            .load(conn)?;
        if due.is_empty() {
            return Ok(0);
        }

        let campaign_ids: Vec<Uuid> = due.iter().map(|t| t.campaign_id).collect();
        let titles: HashMap<Uuid, String> = campaigns::table
            .filter(campaigns::id.eq_any(&campaign_ids))
            .select((campaigns::id, campaigns::title))
            .load::<(Uuid, String)>(conn)?
            .into_iter()
            .collect();
        let assignee_ids: Vec<Uuid> = due.iter().filter_map(|t| t.assignee_id).collect();
        let assignees = load_contacts(conn, &assignee_ids)?;
        let now = Utc::now().naive_utc();
        let mut sent = 0;

        for task in &due {
            let Some(assignee) = task.assignee_id.and_then(|id| assignees.get(&id)) else {
                continue;
            };
            let (Some(due_date), Some(campaign_title)) =
                (task.due_date, titles.get(&task.campaign_id))
            else {
                continue;
            };
            let link = config.app_link(&format!("/campaigns/{}/tasks", task.campaign_id));
            let email = templates::task_due_reminder(
                &assignee.full_name,
                &task.title,
                campaign_title,
                due_date,
                &link,
            )
            .to(&assignee.email);
            enqueue_email(conn, &email)?;

            diesel::update(tasks::table.find(task.id))
                .set(tasks::reminder_sent_at.eq(now))
                .execute(conn)?;
            sent += 1;
        }
        Ok(sent)
    })
}

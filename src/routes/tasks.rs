use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::campaigns::{accepted_expert, campaign_status, load_campaign};
use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Campaign, NewTask, Task},
    notify::{insert_notifications, new_notification, publish_inserted, NotificationKind},
    schema::tasks,
    state::AppState,
    status::{CampaignStatus, TaskStatus},
    utils::{
        json::{classify_field, NullableField},
        time::to_iso,
    },
    validation::Checks,
};

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub due_date: Option<NaiveDate>,
    pub assignee_id: Option<Uuid>,
    pub created_by: Uuid,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            campaign_id: task.campaign_id,
            title: task.title,
            description: task.description,
            status: task.status,
            due_date: task.due_date,
            assignee_id: task.assignee_id,
            created_by: task.created_by,
            completed_at: task.completed_at.map(to_iso),
            created_at: to_iso(task.created_at),
            updated_at: to_iso(task.updated_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub assignee_id: Option<Uuid>,
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = tasks)]
struct TaskChanges {
    title: Option<String>,
    description: Option<Option<String>>,
    status: Option<String>,
    due_date: Option<Option<NaiveDate>>,
    assignee_id: Option<Option<Uuid>>,
    completed_at: Option<Option<NaiveDateTime>>,
    reminder_sent_at: Option<Option<NaiveDateTime>>,
    updated_at: Option<NaiveDateTime>,
}

/// The two people working on a started campaign.
struct Workspace {
    campaign: Campaign,
    expert_id: Option<Uuid>,
}

impl Workspace {
    fn load(conn: &mut PgConnection, campaign_id: Uuid, caller: Uuid) -> AppResult<Self> {
        let campaign = load_campaign(conn, campaign_id)?;
        match campaign_status(&campaign)? {
            CampaignStatus::InProgress | CampaignStatus::Completed => {}
            _ => return Err(AppError::conflict("tasks exist only on started campaigns")),
        }
        let expert_id = accepted_expert(conn, campaign.id)?;
        let workspace = Self {
            campaign,
            expert_id,
        };
        if !workspace.includes(caller) {
            return Err(AppError::forbidden(
                "only the owner and the accepted expert can manage tasks",
            ));
        }
        Ok(workspace)
    }

    fn includes(&self, user_id: Uuid) -> bool {
        self.campaign.organization_id == user_id || self.expert_id == Some(user_id)
    }

    fn is_open(&self) -> bool {
        self.campaign.status == CampaignStatus::InProgress.as_str()
    }
}

pub async fn list_tasks(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<Json<Vec<TaskResponse>>> {
    let mut conn = state.db()?;
    let workspace = Workspace::load(&mut conn, campaign_id, user.user_id)?;

    let rows: Vec<Task> = tasks::table
        .filter(tasks::campaign_id.eq(workspace.campaign.id))
        .order((tasks::due_date.asc().nulls_last(), tasks::created_at.asc()))
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(TaskResponse::from).collect()))
}

pub async fn create_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(campaign_id): Path<Uuid>,
    Json(payload): Json<CreateTaskRequest>,
) -> AppResult<(StatusCode, Json<TaskResponse>)> {
    let mut conn = state.db()?;
    let workspace = Workspace::load(&mut conn, campaign_id, user.user_id)?;
    if !workspace.is_open() {
        return Err(AppError::conflict("completed campaigns are read-only"));
    }

    let mut checks = Checks::new();
    let title = checks.text("title", payload.title.as_deref(), 2, 200);
    let description = checks.optional_text("description", payload.description.as_deref(), 2000);
    if let Some(assignee) = payload.assignee_id {
        if !workspace.includes(assignee) {
            checks.fail("assignee_id", "must be a campaign participant");
        }
    }
    let Some(title) = title else {
        return Err(AppError::validation(checks.into_errors()));
    };
    checks.finish_http(())?;

    let new_task = NewTask {
        id: Uuid::new_v4(),
        campaign_id: workspace.campaign.id,
        title,
        description,
        status: TaskStatus::Todo.as_str().to_string(),
        due_date: payload.due_date,
        assignee_id: payload.assignee_id,
        created_by: user.user_id,
    };

    let (task, notified) = conn.transaction::<_, AppError, _>(|conn| {
        let task: Task = diesel::insert_into(tasks::table)
            .values(&new_task)
            .get_result(conn)?;
        let notified = match task.assignee_id.filter(|assignee| *assignee != user.user_id) {
            Some(assignee) => insert_notifications(
                conn,
                &[assignment_notification(assignee, &task, &workspace.campaign)],
            )?,
            None => Vec::new(),
        };
        Ok((task, notified))
    })?;

    publish_inserted(&state.realtime, notified);
    Ok((StatusCode::CREATED, Json(task.into())))
}

pub async fn update_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(task_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<TaskResponse>> {
    if !body.is_object() {
        return Err(AppError::bad_request("body must be a JSON object"));
    }

    let mut conn = state.db()?;
    let task: Task = tasks::table.find(task_id).first(&mut conn)?;
    let workspace = Workspace::load(&mut conn, task.campaign_id, user.user_id)?;
    if !workspace.is_open() {
        return Err(AppError::conflict("completed campaigns are read-only"));
    }

    let mut checks = Checks::new();
    let mut changes = TaskChanges::default();

    match classify_field::<String>(&body, "title") {
        Ok(NullableField::Omitted) => {}
        Ok(NullableField::Value(title)) => changes.title = checks.text("title", Some(&title), 2, 200),
        Ok(NullableField::Null) => checks.fail("title", "is required"),
        Err(message) => checks.fail("title", message),
    }
    match classify_field::<String>(&body, "description") {
        Ok(NullableField::Omitted) => {}
        Ok(NullableField::Value(text)) => {
            changes.description = Some(checks.optional_text("description", Some(&text), 2000));
        }
        Ok(NullableField::Null) => changes.description = Some(None),
        Err(message) => checks.fail("description", message),
    }
    match classify_field::<TaskStatus>(&body, "status") {
        Ok(NullableField::Omitted) => {}
        Ok(NullableField::Value(status)) => {
            changes.status = Some(status.as_str().to_string());
            changes.completed_at = Some(match status {
                TaskStatus::Done => task.completed_at.or(Some(Utc::now().naive_utc())),
                _ => None,
            });
        }
        Ok(NullableField::Null) => checks.fail("status", "is required"),
        Err(_) => checks.fail("status", "must be one of: todo, in_progress, done"),
    }
    match classify_field::<NaiveDate>(&body, "due_date") {
        Ok(field) => {
            if let Some(due_date) = field.into_change() {
                if due_date != task.due_date {
                    changes.reminder_sent_at = Some(None);
                }
                changes.due_date = Some(due_date);
            }
        }
        Err(message) => checks.fail("due_date", message),
    }
    match classify_field::<Uuid>(&body, "assignee_id") {
        Ok(NullableField::Value(assignee)) if !workspace.includes(assignee) => {
            checks.fail("assignee_id", "must be a campaign participant");
        }
        Ok(field) => changes.assignee_id = field.into_change(),
        Err(message) => checks.fail("assignee_id", message),
    }
    checks.finish_http(())?;

    let newly_assigned = changes
        .assignee_id
        .flatten()
        .filter(|assignee| Some(*assignee) != task.assignee_id && *assignee != user.user_id);
    changes.updated_at = Some(Utc::now().naive_utc());

    let (updated, notified) = conn.transaction::<_, AppError, _>(|conn| {
        let updated: Task = diesel::update(tasks::table.find(task.id))
            .set(&changes)
            .get_result(conn)?;
        let notified = match newly_assigned {
            Some(assignee) => insert_notifications(
                conn,
                &[assignment_notification(assignee, &updated, &workspace.campaign)],
            )?,
            None => Vec::new(),
        };
        Ok((updated, notified))
    })?;

    publish_inserted(&state.realtime, notified);
    Ok(Json(updated.into()))
}

pub async fn delete_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(task_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let task: Task = tasks::table.find(task_id).first(&mut conn)?;
    let workspace = Workspace::load(&mut conn, task.campaign_id, user.user_id)?;
    if !workspace.is_open() {
        return Err(AppError::conflict("completed campaigns are read-only"));
    }
    if task.created_by != user.user_id && workspace.campaign.organization_id != user.user_id {
        return Err(AppError::forbidden(
            "only the task creator or the campaign owner may delete it",
        ));
    }

    diesel::delete(tasks::table.find(task.id)).execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}

fn assignment_notification(
    assignee: Uuid,
    task: &Task,
    campaign: &Campaign,
) -> crate::models::NewNotification {
    new_notification(
        assignee,
        NotificationKind::TaskAssigned,
        "New task assigned",
        format!("\"{}\" in {}", task.title, campaign.title),
        Some(format!("/campaigns/{}/tasks", campaign.id)),
    )
}

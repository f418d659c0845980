use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::Notification,
    realtime::{NotificationRecord, RealtimeEvent, Subscription},
    schema::notifications,
    state::AppState,
};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct NotificationListQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub unread: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkedCount {
    pub updated: usize,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<NotificationListQuery>,
) -> AppResult<Json<Vec<NotificationRecord>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let mut conn = state.db()?;

    let mut statement = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .into_boxed();
    if query.unread_only {
        statement = statement.filter(notifications::read_at.is_null());
    }

    let rows: Vec<Notification> = statement
        .order((notifications::created_at.desc(), notifications::id.desc()))
        .limit(limit)
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(NotificationRecord::from).collect()))
}

pub async fn unread_count(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UnreadCount>> {
    let mut conn = state.db()?;
    let unread = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .filter(notifications::read_at.is_null())
        .count()
        .get_result(&mut conn)?;
    Ok(Json(UnreadCount { unread }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(notification_id): Path<Uuid>,
) -> AppResult<Json<NotificationRecord>> {
    let mut conn = state.db()?;
    let notification: Notification = notifications::table
        .filter(notifications::id.eq(notification_id))
        .filter(notifications::user_id.eq(user.user_id))
        .first(&mut conn)?;
    if notification.read_at.is_some() {
        return Ok(Json(notification.into()));
    }

    let updated: Notification = diesel::update(notifications::table.find(notification.id))
        .set(notifications::read_at.eq(Utc::now().naive_utc()))
        .get_result(&mut conn)?;
    let record = NotificationRecord::from(updated);
    state.realtime.publish(RealtimeEvent::NotificationUpdated {
        notification: record.clone(),
    });
    Ok(Json(record))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<MarkedCount>> {
    let mut conn = state.db()?;
    let updated: Vec<Notification> = diesel::update(
        notifications::table
            .filter(notifications::user_id.eq(user.user_id))
            .filter(notifications::read_at.is_null()),
    )
    .set(notifications::read_at.eq(Utc::now().naive_utc()))
    .get_results(&mut conn)?;

    let count = updated.len();
    for notification in updated {
        state.realtime.publish(RealtimeEvent::NotificationUpdated {
            notification: notification.into(),
        });
    }
    Ok(Json(MarkedCount { updated: count }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(notification_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(
        notifications::table
            .filter(notifications::id.eq(notification_id))
            .filter(notifications::user_id.eq(user.user_id)),
    )
    .execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stream_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    state.realtime.sse(Subscription::User {
        user_id: user.user_id,
    })
}

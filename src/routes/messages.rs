use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use super::campaigns::{is_participant, load_campaign};
use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Campaign, Message, NewMessage},
    notify::{insert_notifications, load_contact, new_notification, publish_inserted, NotificationKind},
    realtime::{MessageRecord, RealtimeEvent, Subscription},
    schema::{messages, proposals},
    state::AppState,
    validation::Checks,
};

const MAX_MESSAGE_LENGTH: usize = 5000;
const PREVIEW_LENGTH: usize = 120;

#[derive(Debug, Deserialize)]
pub struct MessageListQuery {
    pub with: Option<Uuid>,
    #[serde(default)]
    pub mark_read: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: Uuid,
    pub body: Option<String>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(campaign_id): Path<Uuid>,
    Query(query): Query<MessageListQuery>,
) -> AppResult<Json<Vec<MessageRecord>>> {
    let mut conn = state.db()?;
    let campaign = load_campaign(&mut conn, campaign_id)?;
    if !is_participant(&mut conn, &campaign, user.user_id)? {
        return Err(AppError::forbidden("only campaign participants can read messages"));
    }

    if query.mark_read {
        let mut unread = messages::table
            .filter(messages::campaign_id.eq(campaign.id))
            .filter(messages::recipient_id.eq(user.user_id))
            .filter(messages::read_at.is_null())
            .into_boxed();
        if let Some(other) = query.with {
            unread = unread.filter(messages::sender_id.eq(other));
        }
        let unread_ids: Vec<Uuid> = unread.select(messages::id).load(&mut conn)?;

        if !unread_ids.is_empty() {
            let marked: Vec<Message> =
                diesel::update(messages::table.filter(messages::id.eq_any(&unread_ids)))
                    .set(messages::read_at.eq(Utc::now().naive_utc()))
                    .get_results(&mut conn)?;
            debug!(campaign_id = %campaign.id, count = marked.len(), "messages marked read");
            for message in marked {
                state.realtime.publish(RealtimeEvent::MessageUpdated {
                    message: message.into(),
                });
            }
        }
    }

    let mut listing = messages::table
        .filter(messages::campaign_id.eq(campaign.id))
        .into_boxed();
    listing = match query.with {
        Some(other) => listing.filter(
            messages::sender_id
                .eq(user.user_id)
                .and(messages::recipient_id.eq(other))
                .or(messages::sender_id
                    .eq(other)
                    .and(messages::recipient_id.eq(user.user_id))),
        ),
        None => listing.filter(
            messages::sender_id
                .eq(user.user_id)
                .or(messages::recipient_id.eq(user.user_id)),
        ),
    };

    let rows: Vec<Message> = listing
        .order((messages::created_at.asc(), messages::id.asc()))
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(MessageRecord::from).collect()))
}

pub async fn send_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(campaign_id): Path<Uuid>,
    Json(payload): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<MessageRecord>)> {
    let mut checks = Checks::new();
    let body = checks.text("body", payload.body.as_deref(), 1, MAX_MESSAGE_LENGTH);
    let Some(body) = body else {
        return Err(AppError::validation(checks.into_errors()));
    };

    let mut conn = state.db()?;
    let campaign = load_campaign(&mut conn, campaign_id)?;
    if payload.recipient_id == user.user_id {
        return Err(AppError::bad_request("cannot send a message to yourself"));
    }
    if !may_converse(&mut conn, &campaign, user.user_id, payload.recipient_id)? {
        return Err(AppError::forbidden(
            "messages flow between the campaign owner and its applicants",
        ));
    }

    let sender = load_contact(&mut conn, user.user_id)?;
    let new_message = NewMessage {
        id: Uuid::new_v4(),
        campaign_id: campaign.id,
        sender_id: user.user_id,
        recipient_id: payload.recipient_id,
        body,
    };

    let (message, notified) = conn.transaction::<_, AppError, _>(|conn| {
        let message: Message = diesel::insert_into(messages::table)
            .values(&new_message)
            .get_result(conn)?;
        let notified = insert_notifications(
            conn,
            &[new_notification(
                message.recipient_id,
                NotificationKind::MessageReceived,
                format!("New message from {}", sender.full_name),
                preview(&message.body),
                Some(format!("/campaigns/{}/messages", campaign.id)),
            )],
        )?;
        Ok((message, notified))
    })?;

    let record = MessageRecord::from(message);
    state.realtime.publish(RealtimeEvent::MessageInserted {
        message: record.clone(),
    });
    publish_inserted(&state.realtime, notified);

    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn mark_message_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<MessageRecord>> {
    let mut conn = state.db()?;
    let message: Message = messages::table.find(message_id).first(&mut conn)?;
    if message.recipient_id != user.user_id {
        return Err(AppError::not_found());
    }
    if message.read_at.is_some() {
        return Ok(Json(message.into()));
    }

    let updated: Message = diesel::update(messages::table.find(message.id))
        .set(messages::read_at.eq(Utc::now().naive_utc()))
        .get_result(&mut conn)?;
    let record = MessageRecord::from(updated);
    state.realtime.publish(RealtimeEvent::MessageUpdated {
        message: record.clone(),
    });
    Ok(Json(record))
}

pub async fn stream_messages(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let campaign = load_campaign(&mut conn, campaign_id)?;
    if !is_participant(&mut conn, &campaign, user.user_id)? {
        return Err(AppError::forbidden("only campaign participants can read messages"));
    }
    drop(conn);

    Ok(state.realtime.sse(Subscription::Campaign {
        campaign_id: campaign.id,
        participant: user.user_id,
    }))
}

/// The owner talks to applicants; applicants talk to the owner.
fn may_converse(
    conn: &mut PgConnection,
    campaign: &Campaign,
    sender: Uuid,
    recipient: Uuid,
) -> QueryResult<bool> {
    let expert = if sender == campaign.organization_id {
        recipient
    } else if recipient == campaign.organization_id {
        sender
    } else {
        return Ok(false);
    };
    diesel::select(diesel::dsl::exists(
        proposals::table
            .filter(proposals::campaign_id.eq(campaign.id))
            .filter(proposals::expert_id.eq(expert)),
    ))
    .get_result(conn)
}

fn preview(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(PREVIEW_LENGTH).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

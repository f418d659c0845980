use std::collections::HashMap;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use crate::models::{NewNotification, Notification};
use crate::realtime::{RealtimeEvent, RealtimeHub};
use crate::schema::{notifications, users};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    ProposalReceived,
    ProposalAccepted,
    ProposalRejected,
    ProposalWithdrawn,
    MessageReceived,
    TaskAssigned,
    CampaignUpdated,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ProposalReceived => "proposal_received",
            NotificationKind::ProposalAccepted => "proposal_accepted",
            NotificationKind::ProposalRejected => "proposal_rejected",
            NotificationKind::ProposalWithdrawn => "proposal_withdrawn",
            NotificationKind::MessageReceived => "message_received",
            NotificationKind::TaskAssigned => "task_assigned",
            NotificationKind::CampaignUpdated => "campaign_updated",
        }
    }
}

pub fn new_notification(
    user_id: Uuid,
    kind: NotificationKind,
    title: impl Into<String>,
    body: impl Into<String>,
    link: Option<String>,
) -> NewNotification {
    NewNotification {
        id: Uuid::new_v4(),
        user_id,
        kind: kind.as_str().to_string(),
        title: title.into(),
        body: body.into(),
        link,
    }
}

pub fn insert_notifications(
    conn: &mut PgConnection,
    drafts: &[NewNotification],
) -> QueryResult<Vec<Notification>> {
    if drafts.is_empty() {
        return Ok(Vec::new());
    }
    diesel::insert_into(notifications::table)
        .values(drafts)
        .get_results(conn)
}

/// Call once the inserting transaction has committed.
pub fn publish_inserted(hub: &RealtimeHub, inserted: Vec<Notification>) {
    for notification in inserted {
        hub.publish(RealtimeEvent::NotificationInserted {
            notification: notification.into(),
        });
    }
}

/// Where to reach a user by email.
#[derive(Debug, Clone, Queryable)]
pub struct Contact {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
}

pub fn load_contacts(
    conn: &mut PgConnection,
    user_ids: &[Uuid],
) -> QueryResult<HashMap<Uuid, Contact>> {
    if user_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let contacts = users::table
        .filter(users::id.eq_any(user_ids))
        .select((users::id, users::email, users::full_name))
        .load::<Contact>(conn)?;
    Ok(contacts
        .into_iter()
        .map(|contact| (contact.id, contact))
        .collect())
}

pub fn load_contact(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<Contact> {
    users::table
        .find(user_id)
        .select((users::id, users::email, users::full_name))
        .first(conn)
}

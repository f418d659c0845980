//! In-process pub/sub for message and notification changes.
//!
//! Writers publish after their database write commits; readers subscribe
//! with a [`Subscription`] and receive only the events it matches, in
//! broadcast order. A subscriber that falls behind skips what it missed.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{stream, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;
use uuid::Uuid;

use crate::models::{Message, Notification};
use crate::utils::time::to_iso;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: String,
    pub read_at: Option<String>,
    pub created_at: String,
}

impl From<Message> for MessageRecord {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            campaign_id: message.campaign_id,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            body: message.body,
            read_at: message.read_at.map(to_iso),
            created_at: to_iso(message.created_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub read_at: Option<String>,
    pub created_at: String,
}

impl From<Notification> for NotificationRecord {
    fn from(notification: Notification) -> Self {
        Self {
            id: notification.id,
            user_id: notification.user_id,
            kind: notification.kind,
            title: notification.title,
            body: notification.body,
            link: notification.link,
            read_at: notification.read_at.map(to_iso),
            created_at: to_iso(notification.created_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    MessageInserted { message: MessageRecord },
    MessageUpdated { message: MessageRecord },
    NotificationInserted { notification: NotificationRecord },
    NotificationUpdated { notification: NotificationRecord },
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::MessageInserted { .. } => "message_inserted",
            RealtimeEvent::MessageUpdated { .. } => "message_updated",
            RealtimeEvent::NotificationInserted { .. } => "notification_inserted",
            RealtimeEvent::NotificationUpdated { .. } => "notification_updated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    /// Messages of one campaign that `participant` sent or received.
    Campaign { campaign_id: Uuid, participant: Uuid },
    /// Notifications addressed to one user.
    User { user_id: Uuid },
}

impl Subscription {
    pub fn matches(&self, event: &RealtimeEvent) -> bool {
        match (self, event) {
            (
                Subscription::Campaign {
                    campaign_id,
                    participant,
                },
                RealtimeEvent::MessageInserted { message }
                | RealtimeEvent::MessageUpdated { message },
            ) => {
                message.campaign_id == *campaign_id
                    && (message.sender_id == *participant || message.recipient_id == *participant)
            }
            (
                Subscription::User { user_id },
                RealtimeEvent::NotificationInserted { notification }
                | RealtimeEvent::NotificationUpdated { notification },
            ) => notification.user_id == *user_id,
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct RealtimeHub {
    sender: broadcast::Sender<Arc<RealtimeEvent>>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of live subscribers the event reached.
    pub fn publish(&self, event: RealtimeEvent) -> usize {
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn subscribe(
        &self,
        subscription: Subscription,
    ) -> impl Stream<Item = Arc<RealtimeEvent>> + Send + 'static {
        let receiver = self.sender.subscribe();
        stream::unfold(
            (receiver, subscription),
            |(mut receiver, subscription)| async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            if subscription.matches(&event) {
                                return Some((event, (receiver, subscription)));
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, ?subscription, "realtime subscriber lagged");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        )
    }

    pub fn sse(
        &self,
        subscription: Subscription,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
        let events = self.subscribe(subscription).filter_map(|event| async move {
            match Event::default().event(event.name()).json_data(event.as_ref()) {
                Ok(sse_event) => Some(Ok(sse_event)),
                Err(err) => {
                    warn!(error = %err, "failed to encode realtime event");
                    None
                }
            }
        });
        Sse::new(events).keep_alive(KeepAlive::default())
    }
}

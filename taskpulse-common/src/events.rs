//! Real-time push messages and per-user delivery channels
//!
//! Every connected client listens on its own user channel. Delivery is
//! best-effort and at most once: a message pushed to a user with no live
//! subscription is dropped, and clients catch up through the log API.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::db::models::{Event, EventType};

/// Payload of a `notification:new` push
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub actor: Option<String>,
    pub task: Option<String>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl From<&Event> for NotificationPayload {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            event_type: event.event_type,
            actor: event.actor.clone(),
            task: event.task.clone(),
            meta: event.meta.clone(),
            created_at: event.created_at,
            read: false,
        }
    }
}

/// Payload of a `user:login` push (ephemeral, never persisted)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub user_id: String,
    pub user_name: String,
    pub login_time: DateTime<Utc>,
    pub login_streak: i64,
}

/// Payload of a `user:attendance-update` push
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendancePayload {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub status: String,
    pub date: NaiveDate,
    pub day: String,
    pub absent_days: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Message delivered on a user's private channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PushMessage {
    NotificationNew(NotificationPayload),
    NotificationDeleted { id: String },
    NotificationBulkDeleted { ids: Vec<String> },
    UserLogin(LoginPayload),
    AttendanceUpdate(AttendancePayload),
}

impl PushMessage {
    /// Wire name of the message kind (SSE `event:` field)
    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::NotificationNew(_) => "notification:new",
            PushMessage::NotificationDeleted { .. } => "notification:deleted",
            PushMessage::NotificationBulkDeleted { .. } => "notification:bulk-deleted",
            PushMessage::UserLogin(_) => "user:login",
            PushMessage::AttendanceUpdate(_) => "user:attendance-update",
        }
    }
}

/// Capability to push a message to one user's private channel
///
/// Implementations must not block and must not fail the caller.
pub trait Notifier: Send + Sync {
    fn push_to_user(&self, user_id: &str, message: PushMessage);
}

/// Registry of per-user broadcast channels
///
/// A channel is created when the first client of a user subscribes and is
/// pruned on the first push that finds no receivers left.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, broadcast::Sender<PushMessage>>>,
    capacity: usize,
}

impl ChannelRegistry {
    /// Creates a registry whose channels buffer `capacity` messages per user
    ///
    /// Slow clients that fall further behind lose the oldest messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future messages for `user_id`
    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<PushMessage> {
        let mut channels = self.channels.write().unwrap_or_else(|p| p.into_inner());
        channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Live receivers currently attached to `user_id`
    pub fn subscriber_count(&self, user_id: &str) -> usize {
        let channels = self.channels.read().unwrap_or_else(|p| p.into_inner());
        channels
            .get(user_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Users with at least one channel entry (connected or not yet pruned)
    pub fn channel_count(&self) -> usize {
        self.channels.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    fn prune(&self, user_id: &str) {
        let mut channels = self.channels.write().unwrap_or_else(|p| p.into_inner());
        if let Some(tx) = channels.get(user_id) {
            if tx.receiver_count() == 0 {
                channels.remove(user_id);
                debug!("Pruned idle channel for user {}", user_id);
            }
        }
    }
}

impl Notifier for ChannelRegistry {
    fn push_to_user(&self, user_id: &str, message: PushMessage) {
        let kind = message.kind();
        let delivered = {
            let channels = self.channels.read().unwrap_or_else(|p| p.into_inner());
            match channels.get(user_id) {
                Some(tx) => tx.send(message).is_ok(),
                None => {
                    trace!("No channel for user {}; dropped {}", user_id, kind);
                    return;
                }
            }
        };

        if delivered {
            trace!("Pushed {} to user {}", kind, user_id);
        } else {
            self.prune(user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deleted(id: &str) -> PushMessage {
        PushMessage::NotificationDeleted { id: id.to_string() }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(deleted("x").kind(), "notification:deleted");
        assert_eq!(
            PushMessage::NotificationBulkDeleted { ids: vec![] }.kind(),
            "notification:bulk-deleted"
        );
    }

    #[test]
    fn test_untagged_payload_serialization() {
        let json = serde_json::to_value(PushMessage::NotificationBulkDeleted {
            ids: vec!["a".into(), "b".into()],
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "ids": ["a", "b"] }));

        let json = serde_json::to_value(PushMessage::AttendanceUpdate(AttendancePayload {
            user_id: "u1".into(),
            user_name: None,
            status: "absent".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            day: "Tuesday".into(),
            absent_days: 4,
            message: None,
        }))
        .unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["date"], "2024-01-02");
        assert_eq!(json["absentDays"], 4);
        assert!(json.get("userName").is_none());
    }

    #[tokio::test]
    async fn test_push_reaches_only_the_addressed_user() {
        let registry = ChannelRegistry::new(8);
        let mut alice = registry.subscribe("alice");
        let mut bob = registry.subscribe("bob");

        registry.push_to_user("alice", deleted("e1"));

        assert_eq!(alice.recv().await.unwrap(), deleted("e1"));
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_push_fans_out_to_every_connection_of_a_user() {
        let registry = ChannelRegistry::new(8);
        let mut tab1 = registry.subscribe("alice");
        let mut tab2 = registry.subscribe("alice");
        assert_eq!(registry.subscriber_count("alice"), 2);

        registry.push_to_user("alice", deleted("e1"));

        assert_eq!(tab1.recv().await.unwrap(), deleted("e1"));
        assert_eq!(tab2.recv().await.unwrap(), deleted("e1"));
    }

    #[test]
    fn test_push_without_subscriber_is_dropped() {
        let registry = ChannelRegistry::new(8);
        registry.push_to_user("nobody", deleted("e1"));
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn test_channel_pruned_after_last_receiver_drops() {
        let registry = ChannelRegistry::new(8);
        let rx = registry.subscribe("alice");
        assert_eq!(registry.channel_count(), 1);
        drop(rx);

        registry.push_to_user("alice", deleted("e1"));
        assert_eq!(registry.channel_count(), 0);
    }
}

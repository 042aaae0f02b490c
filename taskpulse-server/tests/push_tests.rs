//! Live delivery through the per-user channel registry

use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use taskpulse_common::db::{init_database, EventType, Role};
use taskpulse_common::{ChannelRegistry, Notifier, PushMessage};
use taskpulse_server::store::NewEvent;
use taskpulse_server::AppState;
use tempfile::TempDir;

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

#[tokio::test]
async fn test_only_targeted_subscriber_receives_event() {
    let dir = TempDir::new().unwrap();
    let db = init_database(&dir.path().join("push.db")).await.unwrap();
    let registry = Arc::new(ChannelRegistry::new(8));
    let notifier: Arc<dyn Notifier> = registry.clone();
    let state = AppState::new(
        db,
        notifier,
        registry.clone(),
        FixedOffset::east_opt(0).unwrap(),
        None,
    );

    let now = at("2024-05-02T10:00:00Z");
    let ada = state.users.create("Ada", "ada@example.com", Role::User, now).await.unwrap();
    let bob = state.users.create("Bob", "bob@example.com", Role::User, now).await.unwrap();

    let mut ada_rx = registry.subscribe(&ada.id);
    let mut bob_rx = registry.subscribe(&bob.id);

    let event = state
        .events
        .create(NewEvent::new(EventType::UserMentioned).targets([ada.id.clone()]), now)
        .await
        .unwrap();

    match ada_rx.recv().await.unwrap() {
        PushMessage::NotificationNew(payload) => {
            assert_eq!(payload.id, event.id);
            assert!(!payload.read);
        }
        other => panic!("unexpected push {:?}", other),
    }
    assert!(bob_rx.try_recv().is_err());
}

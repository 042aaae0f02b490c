//! Event log persistence, read state and deletion

mod helpers;

use helpers::{at, setup};
use taskpulse_common::db::EventType;
use taskpulse_common::{Error, PushMessage};
use taskpulse_server::pagination::PageRequest;
use taskpulse_server::store::NewEvent;

fn mention(targets: Vec<String>) -> NewEvent {
    NewEvent::new(EventType::UserMentioned).targets(targets)
}

#[tokio::test]
async fn test_create_normalizes_targets_and_pushes_each_once() {
    let app = setup().await;
    let a = app.user("Ada").await;
    let b = app.user("Bob").await;

    let event = app
        .state
        .events
        .create(
            mention(vec![a.id.clone(), " ".into(), b.id.clone(), a.id.clone()]),
            at("2024-05-02T10:00:00Z"),
        )
        .await
        .unwrap();

    assert_eq!(event.targets, vec![a.id.clone(), b.id.clone()]);
    assert!(event.read_by.is_empty());
    assert_eq!(app.notifier.to_user(&a.id, "notification:new").len(), 1);
    assert_eq!(app.notifier.to_user(&b.id, "notification:new").len(), 1);

    let stored = app.state.events.get(&event.id).await.unwrap();
    assert_eq!(stored.targets, event.targets);
    assert_eq!(stored.created_at, at("2024-05-02T10:00:00Z"));
}

#[tokio::test]
async fn test_audit_only_event_has_no_targets() {
    let app = setup().await;
    let event = app
        .state
        .events
        .create(NewEvent::new(EventType::TaskCreated), at("2024-05-02T10:00:00Z"))
        .await
        .unwrap();

    assert!(event.targets.is_empty());
    assert!(app.notifier.all().is_empty());
}

#[tokio::test]
async fn test_unread_count_is_per_reader() {
    let app = setup().await;
    let a = app.user("Ada").await;
    let b = app.user("Bob").await;
    let now = at("2024-05-02T10:00:00Z");

    let e1 = app
        .state
        .events
        .create(mention(vec![a.id.clone(), b.id.clone()]), now)
        .await
        .unwrap();
    app.state
        .events
        .create(mention(vec![a.id.clone()]), now)
        .await
        .unwrap();

    assert_eq!(app.state.events.unread_count(&a.id).await.unwrap(), 2);
    assert_eq!(app.state.events.unread_count(&b.id).await.unwrap(), 1);

    let view = app.state.events.mark_read(&e1.id, &a.id, now).await.unwrap();
    assert!(view.read);

    assert_eq!(app.state.events.unread_count(&a.id).await.unwrap(), 1);
    assert_eq!(app.state.events.unread_count(&b.id).await.unwrap(), 1);

    // repeated mark-read is idempotent
    app.state.events.mark_read(&e1.id, &a.id, now).await.unwrap();
    let stored = app.state.events.get(&e1.id).await.unwrap();
    assert_eq!(stored.read_by, vec![a.id.clone()]);
}

#[tokio::test]
async fn test_cached_unread_count_refreshes_after_new_event() {
    let app = setup().await;
    let a = app.user("Ada").await;
    let now = at("2024-05-02T10:00:00Z");

    assert_eq!(app.state.events.unread_count(&a.id).await.unwrap(), 0);
    app.state
        .events
        .create(mention(vec![a.id.clone()]), now)
        .await
        .unwrap();
    assert_eq!(app.state.events.unread_count(&a.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_mark_all_read_clears_only_callers_unread() {
    let app = setup().await;
    let a = app.user("Ada").await;
    let b = app.user("Bob").await;
    let now = at("2024-05-02T10:00:00Z");
    for _ in 0..3 {
        app.state
            .events
            .create(mention(vec![a.id.clone(), b.id.clone()]), now)
            .await
            .unwrap();
    }

    assert_eq!(app.state.events.mark_all_read(&a.id, now).await.unwrap(), 3);
    assert_eq!(app.state.events.mark_all_read(&a.id, now).await.unwrap(), 0);
    assert_eq!(app.state.events.unread_count(&a.id).await.unwrap(), 0);
    assert_eq!(app.state.events.unread_count(&b.id).await.unwrap(), 3);
}

#[tokio::test]
async fn test_mark_read_missing_event_is_not_found() {
    let app = setup().await;
    let a = app.user("Ada").await;
    let result = app
        .state
        .events
        .mark_read("missing", &a.id, at("2024-05-02T10:00:00Z"))
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_delete_by_non_target_is_forbidden() {
    let app = setup().await;
    let a = app.user("Ada").await;
    let outsider = app.user("Eve").await;
    let event = app
        .state
        .events
        .create(mention(vec![a.id.clone()]), at("2024-05-02T10:00:00Z"))
        .await
        .unwrap();

    let result = app.state.events.delete(&event.id, &outsider).await;
    match result {
        Err(Error::Forbidden(msg)) => assert!(!msg.contains(&event.id)),
        other => panic!("expected Forbidden, got {:?}", other),
    }
    assert!(app.state.events.get(&event.id).await.is_ok());
}

#[tokio::test]
async fn test_delete_by_target_notifies_requester_and_targets() {
    let app = setup().await;
    let a = app.user("Ada").await;
    let b = app.user("Bob").await;
    let event = app
        .state
        .events
        .create(mention(vec![a.id.clone(), b.id.clone()]), at("2024-05-02T10:00:00Z"))
        .await
        .unwrap();
    app.notifier.clear();

    app.state.events.delete(&event.id, &a).await.unwrap();

    assert!(matches!(
        app.state.events.get(&event.id).await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(app.notifier.to_user(&a.id, "notification:deleted").len(), 1);
    assert_eq!(app.notifier.to_user(&b.id, "notification:deleted").len(), 1);
    assert_eq!(app.count("SELECT COUNT(*) FROM event_targets").await, 0);
}

#[tokio::test]
async fn test_admin_may_delete_any_event() {
    let app = setup().await;
    let admin = app.admin("Root").await;
    let a = app.user("Ada").await;
    let event = app
        .state
        .events
        .create(mention(vec![a.id.clone()]), at("2024-05-02T10:00:00Z"))
        .await
        .unwrap();

    app.state.events.delete(&event.id, &admin).await.unwrap();
    assert_eq!(app.notifier.to_user(&admin.id, "notification:deleted").len(), 1);
}

#[tokio::test]
async fn test_bulk_delete_notifies_union_once() {
    let app = setup().await;
    let admin = app.admin("Root").await;
    let a = app.user("Ada").await;
    let b = app.user("Bob").await;
    let c = app.user("Cy").await;
    let now = at("2024-05-02T10:00:00Z");

    let e1 = app
        .state
        .events
        .create(mention(vec![a.id.clone(), b.id.clone()]), now)
        .await
        .unwrap();
    let e2 = app
        .state
        .events
        .create(mention(vec![b.id.clone(), c.id.clone()]), now)
        .await
        .unwrap();
    let keep = app
        .state
        .events
        .create(mention(vec![a.id.clone()]), now)
        .await
        .unwrap();
    app.notifier.clear();

    let outcome = app
        .state
        .events
        .bulk_delete(&[e1.id.clone(), e2.id.clone()], &admin)
        .await
        .unwrap();

    assert_eq!(outcome.deleted, 2);
    // the deleted events' own targets, separate from the admins told about it
    assert_eq!(outcome.targets.len(), 3);
    assert!(!outcome.targets.contains(&admin.id));
    assert_eq!(outcome.notified.len(), 4);
    assert!(outcome.notified.contains(&admin.id));
    for user in [&a, &b, &c, &admin] {
        let pushes = app.notifier.to_user(&user.id, "notification:bulk-deleted");
        assert_eq!(pushes.len(), 1, "user {} notified once", user.name);
        match &pushes[0] {
            PushMessage::NotificationBulkDeleted { ids } => assert_eq!(ids.len(), 2),
            other => panic!("unexpected push {:?}", other),
        }
    }
    assert!(app.state.events.get(&keep.id).await.is_ok());
}

#[tokio::test]
async fn test_bulk_delete_requires_admin_and_ids() {
    let app = setup().await;
    let admin = app.admin("Root").await;
    let a = app.user("Ada").await;

    let forbidden = app.state.events.bulk_delete(&["x".to_string()], &a).await;
    assert!(matches!(forbidden, Err(Error::Forbidden(_))));

    let empty = app.state.events.bulk_delete(&[], &admin).await;
    assert!(matches!(empty, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_admin_mark_read_marks_listed_events() {
    let app = setup().await;
    let admin = app.admin("Root").await;
    let a = app.user("Ada").await;
    let now = at("2024-05-02T10:00:00Z");
    let e1 = app
        .state
        .events
        .create(mention(vec![a.id.clone()]), now)
        .await
        .unwrap();

    let marked = app
        .state
        .events
        .admin_mark_read(&[e1.id.clone(), "missing".to_string()], &admin, now)
        .await
        .unwrap();
    assert_eq!(marked, 1);
    assert!(app.state.events.get(&e1.id).await.unwrap().is_read_by(&admin.id));
    // the target's own read state is untouched
    assert_eq!(app.state.events.unread_count(&a.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_listing_is_newest_first_and_paginated() {
    let app = setup().await;
    let a = app.user("Ada").await;
    for minute in 0..25 {
        let ts = at("2024-05-02T10:00:00Z") + chrono::Duration::minutes(minute);
        app.state
            .events
            .create(mention(vec![a.id.clone()]).meta(serde_json::json!({ "n": minute })), ts)
            .await
            .unwrap();
    }

    let first = app
        .state
        .events
        .list_for_user(&a.id, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(first.items.len(), 20);
    assert_eq!(first.items[0].event.meta["n"], 24);
    assert_eq!(first.pagination.total_items, 25);
    assert_eq!(first.pagination.total_pages, 2);
    assert!(first.pagination.has_next_page);
    assert!(!first.pagination.has_prev_page);

    let second = app
        .state
        .events
        .list_for_user(&a.id, PageRequest::new(2, 20))
        .await
        .unwrap();
    assert_eq!(second.items.len(), 5);
    assert_eq!(second.items[4].event.meta["n"], 0);
    assert!(!second.pagination.has_next_page);

    let all = app
        .state
        .events
        .list_all(&a.id, PageRequest::new(1, 500))
        .await
        .unwrap();
    assert_eq!(all.items.len(), 25);
}

//! Overdue scanner latch behaviour

mod helpers;

use helpers::{at, setup};
use taskpulse_common::db::{Priority, TaskStatus};
use taskpulse_server::store::{NewTask, TaskUpdate};

fn task(title: &str, due: &str, assignees: Vec<String>) -> NewTask {
    NewTask {
        title: title.to_string(),
        description: String::new(),
        priority: Priority::High,
        due_date: Some(at(due)),
        assigned_to: assignees,
        todo_checklist: Vec::new(),
    }
}

#[tokio::test]
async fn test_overdue_task_is_announced_once() {
    let app = setup().await;
    let admin = app.admin("Root").await;
    let user = app.user("Ada").await;
    let created = app
        .state
        .tasks
        .create(
            task("Ship report", "2024-05-01T12:00:00Z", vec![user.id.clone()]),
            &admin.id,
            at("2024-04-20T12:00:00Z"),
        )
        .await
        .unwrap();

    let first = app.state.overdue.run(at("2024-05-02T12:00:00Z")).await.unwrap();
    assert_eq!(first.found, 1);
    assert_eq!(first.notified, 1);

    let second = app.state.overdue.run(at("2024-05-02T13:00:00Z")).await.unwrap();
    assert_eq!(second.found, 0);
    assert_eq!(second.notified, 0);

    assert_eq!(
        app.count("SELECT COUNT(*) FROM events WHERE event_type = 'task_overdue'").await,
        1
    );
    assert!(app.state.tasks.get(&created.id).await.unwrap().overdue_notified);

    let pushes = app.notifier.to_user(&admin.id, "notification:new");
    assert_eq!(pushes.len(), 1);
    let event_json = serde_json::to_value(&pushes[0]).unwrap();
    assert_eq!(event_json["type"], "task_overdue");
    assert!(event_json["actor"].is_null());
    assert_eq!(event_json["task"], created.id);
    assert_eq!(event_json["meta"]["title"], "Ship report");
}

#[tokio::test]
async fn test_completed_and_future_tasks_are_ignored() {
    let app = setup().await;
    let admin = app.admin("Root").await;
    let done = app
        .state
        .tasks
        .create(task("Done", "2024-05-01T00:00:00Z", vec![]), &admin.id, at("2024-04-20T00:00:00Z"))
        .await
        .unwrap();
    app.state
        .tasks
        .update_status(&done.id, TaskStatus::Completed)
        .await
        .unwrap();
    app.state
        .tasks
        .create(task("Later", "2024-06-01T00:00:00Z", vec![]), &admin.id, at("2024-04-20T00:00:00Z"))
        .await
        .unwrap();

    let report = app.state.overdue.run(at("2024-05-02T00:00:00Z")).await.unwrap();
    assert_eq!(report.found, 0);
    assert_eq!(app.count("SELECT COUNT(*) FROM events").await, 0);
}

#[tokio::test]
async fn test_latch_can_only_be_claimed_once() {
    let app = setup().await;
    let admin = app.admin("Root").await;
    let created = app
        .state
        .tasks
        .create(task("Race", "2024-05-01T00:00:00Z", vec![]), &admin.id, at("2024-04-20T00:00:00Z"))
        .await
        .unwrap();

    assert!(app.state.tasks.claim_overdue_notice(&created.id).await.unwrap());
    assert!(!app.state.tasks.claim_overdue_notice(&created.id).await.unwrap());

    app.state.tasks.release_overdue_notice(&created.id).await.unwrap();
    assert!(app.state.tasks.claim_overdue_notice(&created.id).await.unwrap());
}

#[tokio::test]
async fn test_failed_notice_releases_latch_and_scan_continues() {
    let app = setup().await;
    let admin = app.admin("Root").await;
    let failing = app
        .state
        .tasks
        .create(task("Flaky", "2024-05-01T00:00:00Z", vec![]), &admin.id, at("2024-04-20T00:00:00Z"))
        .await
        .unwrap();
    let healthy = app
        .state
        .tasks
        .create(task("Fine", "2024-05-01T06:00:00Z", vec![]), &admin.id, at("2024-04-20T00:00:00Z"))
        .await
        .unwrap();
    app.fail_inserts(
        "fail_flaky_notice",
        "events",
        &format!("NEW.task_guid = '{}'", failing.id),
    )
    .await;

    let report = app.state.overdue.run(at("2024-05-02T00:00:00Z")).await.unwrap();
    assert_eq!(report.found, 2);
    assert_eq!(report.notified, 1);
    assert_eq!(report.failed, 1);
    assert!(!app.state.tasks.get(&failing.id).await.unwrap().overdue_notified);
    assert!(app.state.tasks.get(&healthy.id).await.unwrap().overdue_notified);

    // the released task is announced by the next scan
    app.drop_trigger("fail_flaky_notice").await;
    let retry = app.state.overdue.run(at("2024-05-02T01:00:00Z")).await.unwrap();
    assert_eq!(retry.found, 1);
    assert_eq!(retry.notified, 1);
    assert_eq!(
        app.count("SELECT COUNT(*) FROM events WHERE event_type = 'task_overdue'").await,
        2
    );
}

#[tokio::test]
async fn test_moving_due_date_rearms_latch() {
    let app = setup().await;
    let admin = app.admin("Root").await;
    let created = app
        .state
        .tasks
        .create(task("Slipping", "2024-05-01T00:00:00Z", vec![]), &admin.id, at("2024-04-20T00:00:00Z"))
        .await
        .unwrap();
    app.state.overdue.run(at("2024-05-02T00:00:00Z")).await.unwrap();

    let moved = app
        .state
        .tasks
        .update(
            &created.id,
            TaskUpdate {
                due_date: Some(at("2024-05-10T00:00:00Z")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!moved.overdue_notified);

    let early = app.state.overdue.run(at("2024-05-05T00:00:00Z")).await.unwrap();
    assert_eq!(early.found, 0);
    let late = app.state.overdue.run(at("2024-05-11T00:00:00Z")).await.unwrap();
    assert_eq!(late.notified, 1);

    // an edit that keeps the due date leaves the latch alone
    let renamed = app
        .state
        .tasks
        .update(
            &created.id,
            TaskUpdate {
                title: Some("Slipped".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(renamed.overdue_notified);
}

//! Shared test fixtures
//!
//! Every test owns a temporary database and a recording notifier, so tests
//! run in parallel without interfering.

#![allow(dead_code)]

use chrono::{DateTime, FixedOffset, Utc};
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use taskpulse_common::db::{init_database, Role, User};
use taskpulse_common::time::to_millis;
use taskpulse_common::{ChannelRegistry, Notifier, PushMessage};
use taskpulse_server::AppState;
use tempfile::TempDir;

/// Notifier that keeps every push for later inspection
#[derive(Default)]
pub struct RecordingNotifier {
    pushes: Mutex<Vec<(String, PushMessage)>>,
}

impl Notifier for RecordingNotifier {
    fn push_to_user(&self, user_id: &str, message: PushMessage) {
        self.pushes
            .lock()
            .unwrap()
            .push((user_id.to_string(), message));
    }
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<(String, PushMessage)> {
        self.pushes.lock().unwrap().clone()
    }

    /// Pushes of one kind (e.g. "notification:new") addressed to `user_id`
    pub fn to_user(&self, user_id: &str, kind: &str) -> Vec<PushMessage> {
        self.all()
            .into_iter()
            .filter(|(u, m)| u == user_id && m.kind() == kind)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.all().iter().filter(|(_, m)| m.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.pushes.lock().unwrap().clear();
    }
}

/// A fresh service wired to a temporary database
pub struct TestApp {
    pub state: AppState,
    pub notifier: Arc<RecordingNotifier>,
    pub db: SqlitePool,
    _dir: TempDir,
}

pub fn utc() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub async fn setup() -> TestApp {
    setup_with(utc(), Some("letmein".to_string())).await
}

pub async fn setup_with(tz: FixedOffset, admin_join_code: Option<String>) -> TestApp {
    let dir = TempDir::new().expect("Should create temp dir");
    let db = init_database(&dir.path().join("test.db"))
        .await
        .expect("Should initialize database");
    let notifier = Arc::new(RecordingNotifier::default());
    let registry = Arc::new(ChannelRegistry::new(16));
    let state = AppState::new(
        db.clone(),
        notifier.clone(),
        registry,
        tz,
        admin_join_code,
    );
    TestApp {
        state,
        notifier,
        db,
        _dir: dir,
    }
}

impl TestApp {
    pub async fn user(&self, name: &str) -> User {
        self.create(name, Role::User).await
    }

    pub async fn admin(&self, name: &str) -> User {
        self.create(name, Role::Admin).await
    }

    async fn create(&self, name: &str, role: Role) -> User {
        let email = format!("{}@example.com", name.to_lowercase());
        self.state
            .users
            .create(name, &email, role, at("2024-01-01T00:00:00Z"))
            .await
            .expect("Should create user")
    }

    /// Overwrite login state directly, bypassing the streak rules
    pub async fn set_login(&self, user_id: &str, last_login: Option<DateTime<Utc>>, streak: i64) {
        sqlx::query("UPDATE users SET last_login_ms = ?, login_streak = ? WHERE guid = ?")
            .bind(last_login.map(to_millis))
            .bind(streak)
            .bind(user_id)
            .execute(&self.db)
            .await
            .expect("Should update login state");
    }

    pub async fn reload(&self, user_id: &str) -> User {
        self.state.users.get(user_id).await.expect("Should load user")
    }

    pub async fn count(&self, sql: &str) -> i64 {
        sqlx::query_scalar(sql)
            .fetch_one(&self.db)
            .await
            .expect("Should count rows")
    }

    pub async fn exec(&self, sql: &str) {
        sqlx::query(sql)
            .execute(&self.db)
            .await
            .expect("Should execute statement");
    }

    /// Make every insert into `table` matching `when` (a condition on `NEW`) fail
    pub async fn fail_inserts(&self, name: &str, table: &str, when: &str) {
        self.exec(&format!(
            "CREATE TRIGGER {name} BEFORE INSERT ON {table} WHEN {when} \
             BEGIN SELECT RAISE(ABORT, 'injected failure'); END"
        ))
        .await;
    }

    pub async fn drop_trigger(&self, name: &str) {
        self.exec(&format!("DROP TRIGGER {name}")).await;
    }

    /// An admin row whose id is stored as a BLOB, so every admin lookup
    /// fails to decode
    pub async fn corrupt_admin(&self) {
        self.exec(
            "INSERT INTO users (guid, name, email, role, created_at_ms) \
             VALUES (X'00FF', 'Broken', 'broken@example.com', 'admin', 0)",
        )
        .await;
    }
}

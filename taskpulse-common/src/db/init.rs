//! Database initialization
//!
//! Creates the database file on first run and applies the schema with
//! idempotent `CREATE TABLE IF NOT EXISTS` statements, so opening an existing
//! database is always safe.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}", db_path.display());
    // WAL allows concurrent readers with one writer (API handlers vs. batch jobs)
    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Apply every table and index definition (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_users_table(pool).await?;
    create_attendance_records_table(pool).await?;
    create_tasks_table(pool).await?;
    create_task_assignees_table(pool).await?;
    create_task_todos_table(pool).await?;
    create_comments_table(pool).await?;
    create_events_table(pool).await?;
    create_event_targets_table(pool).await?;
    create_event_reads_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version, applied_at_ms) VALUES (?, ?)")
        .bind(SCHEMA_VERSION)
        .bind(crate::time::to_millis(crate::time::now()))
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('admin', 'user')),
            last_login_ms INTEGER,
            login_streak INTEGER NOT NULL DEFAULT 0 CHECK (login_streak >= 0),
            absent_days INTEGER NOT NULL DEFAULT 0 CHECK (absent_days >= 0),
            created_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Attendance records: one row per user per calendar day
///
/// The UNIQUE constraint turns a racing second tracker run into a no-op insert.
async fn create_attendance_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_guid TEXT NOT NULL REFERENCES users(guid),
            date TEXT NOT NULL,
            day_name TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('present', 'absent')),
            recorded_at_ms INTEGER NOT NULL,
            UNIQUE (user_guid, date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_tasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            guid TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'in-progress', 'completed')),
            priority TEXT NOT NULL DEFAULT 'medium'
                CHECK (priority IN ('low', 'medium', 'high')),
            due_date_ms INTEGER,
            overdue_notified INTEGER NOT NULL DEFAULT 0,
            progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
            created_by TEXT NOT NULL REFERENCES users(guid),
            created_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_overdue ON tasks(overdue_notified, status, due_date_ms)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_task_assignees_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_assignees (
            task_guid TEXT NOT NULL REFERENCES tasks(guid) ON DELETE CASCADE,
            user_guid TEXT NOT NULL REFERENCES users(guid),
            PRIMARY KEY (task_guid, user_guid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Checklist items of a task, in display order
async fn create_task_todos_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_todos (
            task_guid TEXT NOT NULL REFERENCES tasks(guid) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (task_guid, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_comments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS comments (
            guid TEXT PRIMARY KEY,
            task_guid TEXT NOT NULL REFERENCES tasks(guid) ON DELETE CASCADE,
            author_guid TEXT NOT NULL REFERENCES users(guid),
            content TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Event log
///
/// Actor and task are plain references without foreign keys: the log
/// outlives the rows it mentions.
async fn create_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            guid TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            actor_guid TEXT,
            task_guid TEXT,
            meta TEXT NOT NULL DEFAULT '{}',
            created_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at_ms DESC)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_event_targets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_targets (
            event_guid TEXT NOT NULL REFERENCES events(guid) ON DELETE CASCADE,
            user_guid TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (event_guid, user_guid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_event_targets_user ON event_targets(user_guid)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Read acknowledgments; rows are only ever inserted (read state never reverts)
async fn create_event_reads_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_reads (
            event_guid TEXT NOT NULL REFERENCES events(guid) ON DELETE CASCADE,
            user_guid TEXT NOT NULL,
            read_at_ms INTEGER NOT NULL,
            PRIMARY KEY (event_guid, user_guid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

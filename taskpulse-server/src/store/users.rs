//! User accounts, login state and attendance records

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use taskpulse_common::db::{AttendanceRecord, AttendanceStatus, Role, User};
use taskpulse_common::time::{from_millis, to_millis};
use taskpulse_common::{Error, Result};

use super::{new_guid, push_id_list};

const USER_COLUMNS: &str =
    "guid, name, email, role, last_login_ms, login_streak, absent_days, created_at_ms";

type UserRow = (String, String, String, String, Option<i64>, i64, i64, i64);

fn user_from_row(row: UserRow) -> Result<User> {
    let (guid, name, email, role, last_login_ms, login_streak, absent_days, created_at_ms) = row;
    Ok(User {
        id: guid,
        name,
        email,
        role: role.parse()?,
        last_login_date: last_login_ms.map(from_millis),
        login_streak,
        absent_days,
        created_at: from_millis(created_at_ms),
    })
}

#[derive(Clone)]
pub struct UserRepo {
    db: SqlitePool,
}

impl UserRepo {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create a user with empty attendance state
    pub async fn create(
        &self,
        name: &str,
        email: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<User> {
        let email = email.trim().to_lowercase();
        let exists: Option<String> = sqlx::query_scalar("SELECT guid FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.db)
            .await?;
        if exists.is_some() {
            return Err(Error::InvalidInput("User already exists".to_string()));
        }

        let guid = new_guid();
        sqlx::query(
            "INSERT INTO users (guid, name, email, role, created_at_ms) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&guid)
        .bind(name.trim())
        .bind(&email)
        .bind(role.as_str())
        .bind(to_millis(now))
        .execute(&self.db)
        .await?;

        self.get(&guid).await
    }

    pub async fn find(&self, id: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE guid = ?", USER_COLUMNS);
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.map(user_from_row).transpose()
    }

    pub async fn get(&self, id: &str) -> Result<User> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {}", id)))
    }

    pub async fn list_by_role(&self, role: Role) -> Result<Vec<User>> {
        let sql = format!(
            "SELECT {} FROM users WHERE role = ? ORDER BY created_at_ms, guid",
            USER_COLUMNS
        );
        let rows: Vec<UserRow> = sqlx::query_as(&sql)
            .bind(role.as_str())
            .fetch_all(&self.db)
            .await?;
        rows.into_iter().map(user_from_row).collect()
    }

    pub async fn list_all(&self) -> Result<Vec<User>> {
        let sql = format!("SELECT {} FROM users ORDER BY created_at_ms, guid", USER_COLUMNS);
        let rows: Vec<UserRow> = sqlx::query_as(&sql).fetch_all(&self.db).await?;
        rows.into_iter().map(user_from_row).collect()
    }

    /// Ids of every admin, the recipients of audit notifications
    pub async fn admin_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT guid FROM users WHERE role = 'admin' ORDER BY created_at_ms, guid",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }

    /// Ids from `candidates` that belong to existing users
    pub async fn existing_ids(&self, candidates: &[String]) -> Result<Vec<String>> {
        let mut found = Vec::with_capacity(candidates.len());
        for id in candidates {
            let hit: Option<String> = sqlx::query_scalar("SELECT guid FROM users WHERE guid = ?")
                .bind(id)
                .fetch_optional(&self.db)
                .await?;
            if let Some(id) = hit {
                found.push(id);
            }
        }
        Ok(found)
    }

    /// Users referred to by mention tokens, each token an id or an exact name
    ///
    /// Every user whose id or name matches some token is returned once, in
    /// account creation order.
    pub async fn resolve_mentions(&self, tokens: &[String]) -> Result<Vec<String>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT guid FROM users WHERE guid IN ");
        push_id_list(&mut qb, tokens);
        qb.push(" OR name IN ");
        push_id_list(&mut qb, tokens);
        qb.push(" ORDER BY created_at_ms, guid");

        let ids = qb.build_query_scalar().fetch_all(&self.db).await?;
        Ok(ids)
    }

    /// Write a new login credit if nobody else changed the login state first
    ///
    /// `expected_last_login` is the value read before evaluating the credit.
    /// Returns false when a concurrent login won the race.
    pub async fn update_login(
        &self,
        id: &str,
        expected_last_login: Option<DateTime<Utc>>,
        login_at: DateTime<Utc>,
        login_streak: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET last_login_ms = ?, login_streak = ? \
             WHERE guid = ? AND last_login_ms IS ?",
        )
        .bind(to_millis(login_at))
        .bind(login_streak)
        .bind(id)
        .bind(expected_last_login.map(to_millis))
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Attendance records of one user in insertion order
    pub async fn attendance_records(&self, id: &str) -> Result<Vec<AttendanceRecord>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT date, day_name, status FROM attendance_records WHERE user_guid = ? ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|(date, day, status)| {
                let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .map_err(|e| Error::Internal(format!("bad stored date {}: {}", date, e)))?;
                Ok(AttendanceRecord {
                    date,
                    day,
                    status: status.parse()?,
                })
            })
            .collect()
    }

    pub async fn has_attendance_for(&self, id: &str, date: NaiveDate) -> Result<bool> {
        let hit: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM attendance_records WHERE user_guid = ? AND date = ?",
        )
        .bind(id)
        .bind(date_key(date))
        .fetch_optional(&self.db)
        .await?;
        Ok(hit.is_some())
    }

    /// Record presence for `date`; false if a record for that day already exists
    pub async fn record_present(
        &self,
        id: &str,
        date: NaiveDate,
        day_name: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO attendance_records (user_guid, date, day_name, status, recorded_at_ms) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(date_key(date))
        .bind(day_name)
        .bind(AttendanceStatus::Present.as_str())
        .bind(to_millis(now))
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record absence for `date` and bump the absent-day counter atomically
    ///
    /// Returns the new `absent_days`, or None if the day was already recorded.
    pub async fn record_absent(
        &self,
        id: &str,
        date: NaiveDate,
        day_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO attendance_records (user_guid, date, day_name, status, recorded_at_ms) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(date_key(date))
        .bind(day_name)
        .bind(AttendanceStatus::Absent.as_str())
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let absent_days: i64 = sqlx::query_scalar(
            "UPDATE users SET absent_days = absent_days + 1 WHERE guid = ? RETURNING absent_days",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(absent_days))
    }
}

/// Storage key of a calendar day
fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

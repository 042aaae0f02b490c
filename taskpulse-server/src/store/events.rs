//! Event log and notification fan-out
//!
//! Events are appended once and afterwards only acknowledged (mark-read) or
//! deleted. Every mutation persists first and pushes second, so a client that
//! misses a push still finds the change through the paginated listings.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use taskpulse_common::cache::TtlCache;
use taskpulse_common::db::{Event, EventType, User};
use taskpulse_common::events::{NotificationPayload, Notifier, PushMessage};
use taskpulse_common::time::{from_millis, to_millis};
use taskpulse_common::{Error, Result};
use tracing::{debug, error, info};

use super::{new_guid, push_id_list};
use crate::pagination::{calculate_pagination, Page, PageMeta, PageRequest};

/// Cache key prefix for per-user unread counts
pub const UNREAD_CACHE_PREFIX: &str = "unread:";

const UNREAD_CACHE_TTL: Duration = Duration::from_secs(30);

type EventRow = (String, String, Option<String>, Option<String>, String, i64);

/// An event to append to the log
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub actor: Option<String>,
    pub targets: Vec<String>,
    pub task: Option<String>,
    pub meta: serde_json::Value,
}

impl NewEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            actor: None,
            targets: Vec::new(),
            task: None,
            meta: serde_json::json!({}),
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }
}

/// An event as seen by one reader
#[derive(Debug, Clone, Serialize)]
pub struct EventView {
    #[serde(flatten)]
    pub event: Event,
    /// Whether the viewing user has acknowledged it
    pub read: bool,
}

/// Result of an admin bulk delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkDeleteOutcome {
    pub deleted: u64,
    /// Union of the deleted events' targets, first-seen order
    pub targets: Vec<String>,
    /// Everyone who received the deletion notice, each once: `targets` plus
    /// any admin who was not already among them
    pub notified: Vec<String>,
}

/// Trim, drop empties and de-duplicate, keeping first-seen order
pub fn normalize_targets<I, S>(targets: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[derive(Clone)]
pub struct EventStore {
    db: SqlitePool,
    notifier: Arc<dyn Notifier>,
    cache: Arc<TtlCache<serde_json::Value>>,
}

impl EventStore {
    pub fn new(
        db: SqlitePool,
        notifier: Arc<dyn Notifier>,
        cache: Arc<TtlCache<serde_json::Value>>,
    ) -> Self {
        Self { db, notifier, cache }
    }

    /// Persist an event, then push it to every target
    pub async fn create(&self, new: NewEvent, now: DateTime<Utc>) -> Result<Event> {
        let targets = normalize_targets(&new.targets);
        let guid = new_guid();
        let meta_json = serde_json::to_string(&new.meta)?;

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO events (guid, event_type, actor_guid, task_guid, meta, created_at_ms) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&guid)
        .bind(new.event_type.as_str())
        .bind(&new.actor)
        .bind(&new.task)
        .bind(&meta_json)
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?;

        for (position, target) in targets.iter().enumerate() {
            sqlx::query(
                "INSERT INTO event_targets (event_guid, user_guid, position) VALUES (?, ?, ?)",
            )
            .bind(&guid)
            .bind(target)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let event = Event {
            id: guid,
            event_type: new.event_type,
            actor: new.actor,
            targets,
            task: new.task,
            meta: new.meta,
            read_by: Vec::new(),
            created_at: from_millis(to_millis(now)),
        };

        debug!(
            "Logged {} event {} for {} target(s)",
            event.event_type,
            event.id,
            event.targets.len()
        );

        let payload = NotificationPayload::from(&event);
        for target in &event.targets {
            self.invalidate_unread(target);
            self.notifier
                .push_to_user(target, PushMessage::NotificationNew(payload.clone()));
        }

        Ok(event)
    }

    /// Best-effort variant of [`create`](Self::create) for business operations
    ///
    /// A failed log write is reported and swallowed so that the operation it
    /// describes still succeeds.
    pub async fn record(&self, new: NewEvent, now: DateTime<Utc>) -> Option<Event> {
        let event_type = new.event_type;
        match self.create(new, now).await {
            Ok(event) => Some(event),
            Err(e) => {
                error!("Failed to log {} event: {}", event_type, e);
                None
            }
        }
    }

    /// Best-effort event addressed to every admin except `except`
    ///
    /// Any targets already on `new` are kept. Failing to look up the admins
    /// is handled like a failed log write: reported, and the caller goes on.
    pub async fn record_for_admins(
        &self,
        new: NewEvent,
        except: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<Event> {
        let admins = match self.admin_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Could not load admins for {} event: {}", new.event_type, e);
                return None;
            }
        };

        let mut targets = new.targets.clone();
        targets.extend(admins.into_iter().filter(|id| Some(id.as_str()) != except));
        self.record(new.targets(targets), now).await
    }

    pub async fn get(&self, id: &str) -> Result<Event> {
        let row: Option<EventRow> = sqlx::query_as(
            "SELECT guid, event_type, actor_guid, task_guid, meta, created_at_ms \
             FROM events WHERE guid = ?",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        let row = row.ok_or_else(|| Error::NotFound(format!("event {}", id)))?;
        let mut events = self.hydrate(vec![row]).await?;
        events
            .pop()
            .ok_or_else(|| Error::Internal(format!("event {} vanished while loading", id)))
    }

    /// Events where `user` is a target and has not acknowledged them
    pub async fn unread_count(&self, user: &str) -> Result<i64> {
        let key = format!("{}{}", UNREAD_CACHE_PREFIX, user);
        if let Some(count) = self.cache.get(&key).and_then(|v| v.as_i64()) {
            return Ok(count);
        }
        let generation = self.cache.generation();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM event_targets t \
             WHERE t.user_guid = ? \
             AND NOT EXISTS (SELECT 1 FROM event_reads r \
                             WHERE r.event_guid = t.event_guid AND r.user_guid = t.user_guid)",
        )
        .bind(user)
        .fetch_one(&self.db)
        .await?;

        // A write that lands during the query invalidates; never cache over it
        self.cache
            .set_if_current(key, serde_json::json!(count), UNREAD_CACHE_TTL, generation);
        Ok(count)
    }

    /// Acknowledge one event for `user` (idempotent)
    pub async fn mark_read(&self, id: &str, user: &str, now: DateTime<Utc>) -> Result<EventView> {
        let exists: Option<String> = sqlx::query_scalar("SELECT guid FROM events WHERE guid = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("event {}", id)));
        }

        sqlx::query(
            "INSERT OR IGNORE INTO event_reads (event_guid, user_guid, read_at_ms) VALUES (?, ?, ?)",
        )
        .bind(id)
        .bind(user)
        .bind(to_millis(now))
        .execute(&self.db)
        .await?;

        self.invalidate_unread(user);
        let event = self.get(id).await?;
        Ok(EventView { event, read: true })
    }

    /// Acknowledge every event targeting `user`; returns newly acknowledged count
    pub async fn mark_all_read(&self, user: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO event_reads (event_guid, user_guid, read_at_ms) \
             SELECT event_guid, user_guid, ? FROM event_targets WHERE user_guid = ?",
        )
        .bind(to_millis(now))
        .bind(user)
        .execute(&self.db)
        .await?;

        self.invalidate_unread(user);
        Ok(result.rows_affected())
    }

    /// Acknowledge the listed events on behalf of an admin
    pub async fn admin_mark_read(
        &self,
        ids: &[String],
        requester: &User,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        require_admin(requester)?;
        let ids = normalize_targets(ids);
        if ids.is_empty() {
            return Err(Error::InvalidInput("Provide array of ids".to_string()));
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO event_reads (event_guid, user_guid, read_at_ms) SELECT guid, ",
        );
        qb.push_bind(&requester.id);
        qb.push(", ");
        qb.push_bind(to_millis(now));
        qb.push(" FROM events WHERE guid IN ");
        push_id_list(&mut qb, &ids);

        let result = qb.build().execute(&self.db).await?;
        self.invalidate_unread(&requester.id);
        Ok(result.rows_affected())
    }

    /// Delete one event; allowed for its targets and for admins
    pub async fn delete(&self, id: &str, requester: &User) -> Result<()> {
        let event = self.get(id).await?;
        if !event.is_target(&requester.id) && !requester.is_admin() {
            return Err(Error::Forbidden("Not allowed to delete this notification".to_string()));
        }

        sqlx::query("DELETE FROM events WHERE guid = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        info!("Event {} deleted by {}", id, requester.id);

        let recipients = normalize_targets(
            std::iter::once(requester.id.as_str()).chain(event.targets.iter().map(String::as_str)),
        );
        for user in &recipients {
            self.invalidate_unread(user);
            self.notifier.push_to_user(
                user,
                PushMessage::NotificationDeleted { id: id.to_string() },
            );
        }
        Ok(())
    }

    /// Admin-only bulk delete
    ///
    /// The union of the original targets is collected before deletion. Each
    /// member of that union, and each admin, receives exactly one notice.
    pub async fn bulk_delete(&self, ids: &[String], requester: &User) -> Result<BulkDeleteOutcome> {
        require_admin(requester)?;
        let ids = normalize_targets(ids);
        if ids.is_empty() {
            return Err(Error::InvalidInput("Provide array of ids".to_string()));
        }

        let mut tx = self.db.begin().await?;

        let mut select: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT user_guid FROM event_targets WHERE event_guid IN ");
        push_id_list(&mut select, &ids);
        select.push(" ORDER BY event_guid, position");
        let affected: Vec<String> = select.build_query_scalar().fetch_all(&mut *tx).await?;

        let mut delete: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM events WHERE guid IN ");
        push_id_list(&mut delete, &ids);
        let deleted = delete.build().execute(&mut *tx).await?.rows_affected();

        let admins: Vec<String> = sqlx::query_scalar(
            "SELECT guid FROM users WHERE role = 'admin' ORDER BY created_at_ms, guid",
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("Bulk delete by {}: {} of {} event(s) removed", requester.id, deleted, ids.len());

        let targets = normalize_targets(&affected);
        let notified = normalize_targets(targets.iter().chain(admins.iter()));
        self.cache.invalidate_by_prefix(UNREAD_CACHE_PREFIX);
        for user in &notified {
            self.notifier.push_to_user(
                user,
                PushMessage::NotificationBulkDeleted { ids: ids.clone() },
            );
        }

        Ok(BulkDeleteOutcome {
            deleted,
            targets,
            notified,
        })
    }

    /// Newest-first page of events targeting `user`
    pub async fn list_for_user(&self, user: &str, request: PageRequest) -> Result<Page<EventView>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_targets WHERE user_guid = ?")
            .bind(user)
            .fetch_one(&self.db)
            .await?;
        let pagination = calculate_pagination(total, request);

        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT e.guid, e.event_type, e.actor_guid, e.task_guid, e.meta, e.created_at_ms \
             FROM events e JOIN event_targets t ON t.event_guid = e.guid \
             WHERE t.user_guid = ? \
             ORDER BY e.created_at_ms DESC, e.guid DESC \
             LIMIT ? OFFSET ?",
        )
        .bind(user)
        .bind(pagination.page_size)
        .bind(pagination.offset)
        .fetch_all(&self.db)
        .await?;

        let items = self.views_for(user, rows).await?;
        Ok(Page {
            items,
            pagination: PageMeta::from(pagination),
        })
    }

    /// Newest-first page of the whole log; `read` is computed for `viewer`
    pub async fn list_all(&self, viewer: &str, request: PageRequest) -> Result<Page<EventView>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.db)
            .await?;
        let pagination = calculate_pagination(total, request);

        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT guid, event_type, actor_guid, task_guid, meta, created_at_ms FROM events \
             ORDER BY created_at_ms DESC, guid DESC \
             LIMIT ? OFFSET ?",
        )
        .bind(pagination.page_size)
        .bind(pagination.offset)
        .fetch_all(&self.db)
        .await?;

        let items = self.views_for(viewer, rows).await?;
        Ok(Page {
            items,
            pagination: PageMeta::from(pagination),
        })
    }

    async fn views_for(&self, viewer: &str, rows: Vec<EventRow>) -> Result<Vec<EventView>> {
        Ok(self
            .hydrate(rows)
            .await?
            .into_iter()
            .map(|event| {
                let read = event.is_read_by(viewer);
                EventView { event, read }
            })
            .collect())
    }

    /// Attach target and reader sets to event rows, preserving row order
    async fn hydrate(&self, rows: Vec<EventRow>) -> Result<Vec<Event>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = rows.iter().map(|r| r.0.clone()).collect();

        let mut select: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT event_guid, user_guid FROM event_targets WHERE event_guid IN ");
        push_id_list(&mut select, &ids);
        select.push(" ORDER BY event_guid, position");
        let target_rows: Vec<(String, String)> = select.build_query_as().fetch_all(&self.db).await?;

        let mut select: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT event_guid, user_guid FROM event_reads WHERE event_guid IN ");
        push_id_list(&mut select, &ids);
        select.push(" ORDER BY event_guid, read_at_ms, rowid");
        let read_rows: Vec<(String, String)> = select.build_query_as().fetch_all(&self.db).await?;

        let mut targets: HashMap<String, Vec<String>> = HashMap::new();
        for (event, user) in target_rows {
            targets.entry(event).or_default().push(user);
        }
        let mut readers: HashMap<String, Vec<String>> = HashMap::new();
        for (event, user) in read_rows {
            readers.entry(event).or_default().push(user);
        }

        rows.into_iter()
            .map(|(guid, event_type, actor, task, meta, created_at_ms)| {
                Ok(Event {
                    targets: targets.remove(&guid).unwrap_or_default(),
                    read_by: readers.remove(&guid).unwrap_or_default(),
                    event_type: event_type.parse()?,
                    actor,
                    task,
                    meta: serde_json::from_str(&meta)?,
                    created_at: from_millis(created_at_ms),
                    id: guid,
                })
            })
            .collect()
    }

    async fn admin_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT guid FROM users WHERE role = 'admin' ORDER BY created_at_ms, guid",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }

    fn invalidate_unread(&self, user: &str) {
        self.cache
            .invalidate_by_prefix(&format!("{}{}", UNREAD_CACHE_PREFIX, user));
    }
}

fn require_admin(user: &User) -> Result<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(Error::Forbidden("Admin access required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_targets_dedupes_and_drops_empty() {
        let t = normalize_targets(vec!["b", " a ", "", "b", "c", "a"]);
        assert_eq!(t, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_normalize_targets_empty_input() {
        let t = normalize_targets(Vec::<String>::new());
        assert!(t.is_empty());
    }

    #[test]
    fn test_new_event_builder() {
        let e = NewEvent::new(EventType::TaskOverdue)
            .targets(["a", "b"])
            .task("t1")
            .meta(serde_json::json!({ "title": "x" }));
        assert!(e.actor.is_none());
        assert_eq!(e.targets, vec!["a", "b"]);
        assert_eq!(e.task.as_deref(), Some("t1"));
        assert_eq!(e.meta["title"], "x");
    }
}

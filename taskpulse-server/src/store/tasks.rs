//! Tasks, assignees, checklists, comments and the overdue latch

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;
use taskpulse_common::db::{
    checklist_progress, sanitize_checklist, Comment, Priority, Task, TaskStatus, TodoItem,
};
use taskpulse_common::time::{from_millis, to_millis};
use taskpulse_common::{Error, Result};

use super::new_guid;

const TASK_COLUMNS: &str = "guid, title, description, status, priority, due_date_ms, \
                            overdue_notified, progress, created_by, created_at_ms";

/// Tasks shown in a dashboard's recent list
const RECENT_TASKS: i64 = 10;

/// Restricts a query to the tasks assigned to `?`, or to every task when `?` is NULL
const SCOPE_FILTER: &str =
    "(? IS NULL OR guid IN (SELECT task_guid FROM task_assignees WHERE user_guid = ?))";

type TaskRow = (String, String, String, String, String, Option<i64>, bool, i64, String, i64);

/// Fields of a task to be created
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub assigned_to: Vec<String>,
    pub todo_checklist: Vec<TodoItem>,
}

/// Partial edit of a task; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<DateTime<Utc>>,
    pub assigned_to: Option<Vec<String>>,
    pub todo_checklist: Option<Vec<TodoItem>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskSort {
    #[default]
    CreatedAt,
    DueDate,
}

impl FromStr for TaskSort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "createdAt" | "assignedDate" => Ok(TaskSort::CreatedAt),
            "dueDate" | "deadline" => Ok(TaskSort::DueDate),
            other => Err(Error::InvalidInput(format!("unknown sort key: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(Error::InvalidInput(format!("unknown sort order: {}", other))),
        }
    }
}

/// Listing filters
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    /// Case-insensitive substring of the title
    pub search: Option<String>,
    /// Only tasks assigned to this user
    pub assignee: Option<String>,
    pub sort: TaskSort,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub all: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriorityCounts {
    pub low: i64,
    pub medium: i64,
    pub high: i64,
}

/// A task as listed on a dashboard
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub statuses: StatusCounts,
    /// Not completed and past due, whether or not already announced
    pub overdue: i64,
    pub priorities: PriorityCounts,
    pub recent_tasks: Vec<TaskSummary>,
}

#[derive(Clone)]
pub struct TaskRepo {
    db: SqlitePool,
}

impl TaskRepo {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        new: NewTask,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        if new.title.trim().is_empty() {
            return Err(Error::InvalidInput("title is required".to_string()));
        }

        let guid = new_guid();
        let checklist = sanitize_checklist(new.todo_checklist);
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO tasks (guid, title, description, status, priority, due_date_ms, progress, created_by, created_at_ms) \
             VALUES (?, ?, ?, 'pending', ?, ?, ?, ?, ?)",
        )
        .bind(&guid)
        .bind(new.title.trim())
        .bind(&new.description)
        .bind(new.priority.as_str())
        .bind(new.due_date.map(to_millis))
        .bind(checklist_progress(&checklist))
        .bind(created_by)
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?;

        for user in &new.assigned_to {
            sqlx::query("INSERT OR IGNORE INTO task_assignees (task_guid, user_guid) VALUES (?, ?)")
                .bind(&guid)
                .bind(user)
                .execute(&mut *tx)
                .await?;
        }
        write_checklist(&mut tx, &guid, &checklist).await?;

        tx.commit().await?;
        self.get(&guid).await
    }

    pub async fn get(&self, id: &str) -> Result<Task> {
        let sql = format!("SELECT {} FROM tasks WHERE guid = ?", TASK_COLUMNS);
        let row: Option<TaskRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        let row = row.ok_or_else(|| Error::NotFound(format!("task {}", id)))?;
        self.hydrate(row).await
    }

    /// Tasks matching `filter`, restricted to `visible_to` when given
    pub async fn list(&self, filter: &TaskFilter, visible_to: Option<&str>) -> Result<Vec<Task>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM tasks WHERE 1 = 1", TASK_COLUMNS));

        for user in visible_to.iter().chain(filter.assignee.as_ref().map(String::as_str).iter()) {
            qb.push(" AND guid IN (SELECT task_guid FROM task_assignees WHERE user_guid = ");
            qb.push_bind(user.to_string());
            qb.push(")");
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ");
            qb.push_bind(status.as_str());
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            qb.push(" AND title LIKE '%' || ");
            qb.push_bind(search.to_string());
            qb.push(" || '%'");
        }

        qb.push(match (filter.sort, filter.order) {
            (TaskSort::CreatedAt, SortOrder::Asc) => " ORDER BY created_at_ms, guid",
            (TaskSort::CreatedAt, SortOrder::Desc) => " ORDER BY created_at_ms DESC, guid DESC",
            // undated tasks sort as if due last
            (TaskSort::DueDate, SortOrder::Asc) => {
                " ORDER BY due_date_ms IS NULL, due_date_ms, guid"
            }
            (TaskSort::DueDate, SortOrder::Desc) => {
                " ORDER BY due_date_ms IS NULL DESC, due_date_ms DESC, guid DESC"
            }
        });

        let rows: Vec<TaskRow> = qb.build_query_as().fetch_all(&self.db).await?;
        self.hydrate_all(rows).await
    }

    /// Per-status totals, over the tasks assigned to `scope` or over all tasks
    pub async fn status_counts(&self, scope: Option<&str>) -> Result<StatusCounts> {
        let sql = format!(
            "SELECT COUNT(*), \
                    COALESCE(SUM(status = 'pending'), 0), \
                    COALESCE(SUM(status = 'in-progress'), 0), \
                    COALESCE(SUM(status = 'completed'), 0) \
             FROM tasks WHERE {}",
            SCOPE_FILTER
        );
        let (all, pending, in_progress, completed): (i64, i64, i64, i64) = sqlx::query_as(&sql)
            .bind(scope)
            .bind(scope)
            .fetch_one(&self.db)
            .await?;
        Ok(StatusCounts {
            all,
            pending,
            in_progress,
            completed,
        })
    }

    /// Dashboard figures for the tasks assigned to `scope`, or for all tasks
    pub async fn dashboard(&self, scope: Option<&str>, now: DateTime<Utc>) -> Result<Dashboard> {
        let statuses = self.status_counts(scope).await?;

        let sql = format!(
            "SELECT COALESCE(SUM(status != 'completed' AND due_date_ms < ?), 0), \
                    COALESCE(SUM(priority = 'low'), 0), \
                    COALESCE(SUM(priority = 'medium'), 0), \
                    COALESCE(SUM(priority = 'high'), 0) \
             FROM tasks WHERE {}",
            SCOPE_FILTER
        );
        let (overdue, low, medium, high): (i64, i64, i64, i64) = sqlx::query_as(&sql)
            .bind(to_millis(now))
            .bind(scope)
            .bind(scope)
            .fetch_one(&self.db)
            .await?;

        let sql = format!(
            "SELECT guid, title, status, priority, due_date_ms, created_at_ms FROM tasks \
             WHERE {} ORDER BY created_at_ms DESC, guid DESC LIMIT ?",
            SCOPE_FILTER
        );
        let rows: Vec<(String, String, String, String, Option<i64>, i64)> = sqlx::query_as(&sql)
            .bind(scope)
            .bind(scope)
            .bind(RECENT_TASKS)
            .fetch_all(&self.db)
            .await?;

        let recent_tasks = rows
            .into_iter()
            .map(|(guid, title, status, priority, due_date_ms, created_at_ms)| {
                Ok(TaskSummary {
                    id: guid,
                    title,
                    status: status.parse()?,
                    priority: priority.parse()?,
                    due_date: due_date_ms.map(from_millis),
                    created_at: from_millis(created_at_ms),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Dashboard {
            statuses,
            overdue,
            priorities: PriorityCounts { low, medium, high },
            recent_tasks,
        })
    }

    /// Completing a task also completes its whole checklist
    pub async fn update_status(&self, id: &str, status: TaskStatus) -> Result<Task> {
        let mut tx = self.db.begin().await?;
        let result = if status == TaskStatus::Completed {
            sqlx::query("UPDATE task_todos SET completed = 1 WHERE task_guid = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE tasks SET status = ?, progress = 100 WHERE guid = ?")
                .bind(status.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await?
        } else {
            sqlx::query("UPDATE tasks SET status = ? WHERE guid = ?")
                .bind(status.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await?
        };
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("task {}", id)));
        }
        tx.commit().await?;
        self.get(id).await
    }

    /// Apply a partial edit
    ///
    /// Moving the due date re-arms the overdue latch so the new deadline is
    /// announced too. A new checklist recomputes progress but keeps the status.
    pub async fn update(&self, id: &str, update: TaskUpdate) -> Result<Task> {
        let current = self.get(id).await?;

        let title = match update.title {
            Some(t) if t.trim().is_empty() => {
                return Err(Error::InvalidInput("title is required".to_string()));
            }
            Some(t) => t.trim().to_string(),
            None => current.title,
        };
        let due_date = update.due_date.or(current.due_date);
        let rearm = due_date != current.due_date;
        let checklist = update.todo_checklist.map(sanitize_checklist);
        let progress = checklist
            .as_deref()
            .map(checklist_progress)
            .unwrap_or(current.progress);

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "UPDATE tasks SET title = ?, description = ?, priority = ?, due_date_ms = ?, progress = ?, \
             overdue_notified = CASE WHEN ? THEN 0 ELSE overdue_notified END \
             WHERE guid = ?",
        )
        .bind(&title)
        .bind(update.description.unwrap_or(current.description))
        .bind(update.priority.unwrap_or(current.priority).as_str())
        .bind(due_date.map(to_millis))
        .bind(progress)
        .bind(rearm)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if let Some(assignees) = &update.assigned_to {
            sqlx::query("DELETE FROM task_assignees WHERE task_guid = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            for user in assignees {
                sqlx::query("INSERT OR IGNORE INTO task_assignees (task_guid, user_guid) VALUES (?, ?)")
                    .bind(id)
                    .bind(user)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        if let Some(items) = &checklist {
            write_checklist(&mut tx, id, items).await?;
        }

        tx.commit().await?;
        self.get(id).await
    }

    /// Replace the checklist; progress and status follow from it
    pub async fn update_checklist(&self, id: &str, items: Vec<TodoItem>) -> Result<Task> {
        let items = sanitize_checklist(items);
        let progress = checklist_progress(&items);
        let status = TaskStatus::from_progress(progress);

        let mut tx = self.db.begin().await?;
        let result = sqlx::query("UPDATE tasks SET progress = ?, status = ? WHERE guid = ?")
            .bind(progress)
            .bind(status.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("task {}", id)));
        }
        write_checklist(&mut tx, id, &items).await?;
        tx.commit().await?;

        self.get(id).await
    }

    /// Delete a task with its assignees, checklist and comments
    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE guid = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("task {}", id)));
        }
        Ok(())
    }

    /// Tasks past due, not completed, and not yet announced as overdue
    pub async fn find_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM tasks \
             WHERE due_date_ms < ? AND status != 'completed' AND overdue_notified = 0 \
             ORDER BY due_date_ms, guid",
            TASK_COLUMNS
        );
        let rows: Vec<TaskRow> = sqlx::query_as(&sql)
            .bind(to_millis(now))
            .fetch_all(&self.db)
            .await?;
        self.hydrate_all(rows).await
    }

    /// Set the overdue latch; false if it was already set
    pub async fn claim_overdue_notice(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET overdue_notified = 1 WHERE guid = ? AND overdue_notified = 0",
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Clear the latch after a claimed notice could not be logged
    pub async fn release_overdue_notice(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET overdue_notified = 0 WHERE guid = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn add_comment(
        &self,
        task_id: &str,
        author: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Comment> {
        if content.trim().is_empty() {
            return Err(Error::InvalidInput("comment content is required".to_string()));
        }

        let guid = new_guid();
        sqlx::query(
            "INSERT INTO comments (guid, task_guid, author_guid, content, created_at_ms) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&guid)
        .bind(task_id)
        .bind(author)
        .bind(content)
        .bind(to_millis(now))
        .execute(&self.db)
        .await?;

        Ok(Comment {
            id: guid,
            task: task_id.to_string(),
            author: author.to_string(),
            content: content.to_string(),
            created_at: now,
        })
    }

    async fn hydrate_all(&self, rows: Vec<TaskRow>) -> Result<Vec<Task>> {
        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            tasks.push(self.hydrate(row).await?);
        }
        Ok(tasks)
    }

    async fn hydrate(&self, row: TaskRow) -> Result<Task> {
        let (
            guid,
            title,
            description,
            status,
            priority,
            due_date_ms,
            overdue_notified,
            progress,
            created_by,
            created_at_ms,
        ) = row;

        let assigned_to: Vec<String> = sqlx::query_scalar(
            "SELECT user_guid FROM task_assignees WHERE task_guid = ? ORDER BY rowid",
        )
        .bind(&guid)
        .fetch_all(&self.db)
        .await?;

        let todo_checklist = sqlx::query_as::<_, (String, bool)>(
            "SELECT text, completed FROM task_todos WHERE task_guid = ? ORDER BY position",
        )
        .bind(&guid)
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .map(|(text, completed)| TodoItem { text, completed })
        .collect();

        Ok(Task {
            id: guid,
            title,
            description,
            status: status.parse()?,
            priority: priority.parse()?,
            due_date: due_date_ms.map(from_millis),
            overdue_notified,
            progress,
            todo_checklist,
            assigned_to,
            created_by,
            created_at: from_millis(created_at_ms),
        })
    }
}

async fn write_checklist(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    task_id: &str,
    items: &[TodoItem],
) -> Result<()> {
    sqlx::query("DELETE FROM task_todos WHERE task_guid = ?")
        .bind(task_id)
        .execute(&mut **tx)
        .await?;
    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO task_todos (task_guid, position, text, completed) VALUES (?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(position as i64)
        .bind(&item.text)
        .bind(item.completed)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

//! Task endpoints
//!
//! Task creation, completion and comment mentions feed the event log. The
//! log writes are best-effort: once the task change is stored the request
//! succeeds, whatever happens to its notices.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use taskpulse_common::db::{EventType, Priority, Task, TaskStatus, TodoItem, User};
use taskpulse_common::time::now;
use taskpulse_common::Error;
use tracing::info;

use crate::api::auth::CurrentUser;
use crate::error::ApiResult;
use crate::store::{
    normalize_targets, NewEvent, NewTask, SortOrder, TaskFilter, TaskSort, TaskUpdate,
};
use crate::AppState;

/// Characters of a comment quoted in a mention notice
const MENTION_PREVIEW_CHARS: usize = 100;

/// `@` followed by a user name or id
const MENTION_PATTERN: &str = r"@([A-Za-z0-9_-]+)";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assigned_to: Vec<String>,
    #[serde(default, alias = "todoCheckList")]
    pub todo_checklist: Vec<TodoItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub assigned_to: Option<Vec<String>>,
    #[serde(alias = "todoCheckList")]
    pub todo_checklist: Option<Vec<TodoItem>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistRequest {
    #[serde(alias = "todoCheckList")]
    pub todo_checklist: Vec<TodoItem>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    pub status: Option<String>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    /// Admins only; ignored for everyone else
    pub assigned_to_user: Option<String>,
}

impl TaskQuery {
    fn into_filter(self) -> Result<TaskFilter, Error> {
        Ok(TaskFilter {
            status: self.status.as_deref().map(str::parse::<TaskStatus>).transpose()?,
            search: self.search,
            assignee: self.assigned_to_user,
            sort: self
                .sort_by
                .as_deref()
                .map(str::parse::<TaskSort>)
                .transpose()?
                .unwrap_or_default(),
            order: self
                .sort_order
                .as_deref()
                .map(str::parse::<SortOrder>)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub content: String,
    /// Extra user ids to mention besides the `@` tokens in `content`
    #[serde(default)]
    pub mentions: Vec<String>,
}

/// `@token` mentions in comment text, first-seen order, each once
pub fn mention_tokens(content: &str) -> Result<Vec<String>, Error> {
    let pattern = Regex::new(MENTION_PATTERN)
        .map_err(|e| Error::Internal(format!("mention pattern: {}", e)))?;
    Ok(normalize_targets(
        pattern.captures_iter(content).filter_map(|c| c.get(1)).map(|m| m.as_str()),
    ))
}

fn require_assignee_or_admin(user: &User, task: &Task) -> Result<(), Error> {
    if user.is_admin() || task.is_assignee(&user.id) {
        Ok(())
    } else {
        Err(Error::Forbidden("Not allowed to access this task".to_string()))
    }
}

/// POST /api/tasks (admin)
pub async fn create_task(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    current.require_admin()?;
    let CurrentUser(creator) = current;

    let priority = match req.priority.as_deref() {
        Some(p) => p.parse::<Priority>()?,
        None => Priority::Medium,
    };

    let assigned_to = normalize_targets(&req.assigned_to);
    let known = state.users.existing_ids(&assigned_to).await?;
    if known.len() != assigned_to.len() {
        return Err(Error::InvalidInput("Unknown assignee".to_string()).into());
    }

    let at = now();
    let task = state
        .tasks
        .create(
            NewTask {
                title: req.title,
                description: req.description,
                priority,
                due_date: req.due_date,
                assigned_to,
                todo_checklist: req.todo_checklist,
            },
            &creator.id,
            at,
        )
        .await?;
    info!("Task {} created by {}", task.id, creator.id);

    let created = NewEvent::new(EventType::TaskCreated)
        .actor(creator.id.clone())
        .task(task.id.clone())
        .meta(json!({ "title": task.title, "priority": task.priority }));
    state.events.record_for_admins(created, None, at).await;

    announce_assignment(&state, &creator, &task, &task.assigned_to, at).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "task": task })),
    ))
}

/// GET /api/tasks
///
/// Admins see every task, everyone else the tasks assigned to them.
pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<Json<Value>> {
    let mut filter = query.into_filter()?;
    let scope = if user.is_admin() {
        None
    } else {
        filter.assignee = None;
        Some(user.id.as_str())
    };

    let tasks = state.tasks.list(&filter, scope).await?;
    let summary = state.tasks.status_counts(scope).await?;
    let tasks: Vec<Value> = tasks
        .into_iter()
        .map(|task| {
            let completed_items = task.completed_items();
            let mut value = json!(task);
            value["completedItems"] = json!(completed_items);
            value
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "tasks": tasks,
        "statusSummary": summary,
    })))
}

/// GET /api/tasks/:id (assignee or admin)
pub async fn get_task(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let task = state.tasks.get(&id).await?;
    require_assignee_or_admin(&user, &task)?;
    Ok(Json(json!({ "success": true, "task": task })))
}

/// PUT /api/tasks/:id (assignee or admin; reassigning is admin only)
///
/// Users added to the task get a `task_assigned` notice.
pub async fn update_task(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> ApiResult<Json<Value>> {
    let before = state.tasks.get(&id).await?;
    require_assignee_or_admin(&user, &before)?;

    let assigned_to = match req.assigned_to {
        Some(_) if !user.is_admin() => {
            return Err(Error::Forbidden("Only admins can reassign tasks".to_string()).into());
        }
        Some(ids) => {
            let ids = normalize_targets(&ids);
            if state.users.existing_ids(&ids).await?.len() != ids.len() {
                return Err(Error::InvalidInput("Unknown assignee".to_string()).into());
            }
            Some(ids)
        }
        None => None,
    };

    let update = TaskUpdate {
        title: req.title,
        description: req.description,
        priority: req.priority.as_deref().map(str::parse::<Priority>).transpose()?,
        due_date: req.due_date,
        assigned_to,
        todo_checklist: req.todo_checklist,
    };
    let task = state.tasks.update(&id, update).await?;

    let added: Vec<String> = task
        .assigned_to
        .iter()
        .filter(|a| !before.is_assignee(a))
        .cloned()
        .collect();
    announce_assignment(&state, &user, &task, &added, now()).await;

    Ok(Json(json!({ "success": true, "task": task })))
}

/// DELETE /api/tasks/:id (admin)
pub async fn delete_task(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    current.require_admin()?;
    state.tasks.delete(&id).await?;
    info!("Task {} deleted by {}", id, current.0.id);
    Ok(Json(json!({ "success": true })))
}

/// PUT /api/tasks/:id/status (assignee or admin)
pub async fn update_task_status(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> ApiResult<Json<Value>> {
    let status: TaskStatus = req.status.parse()?;
    let task = state.tasks.get(&id).await?;
    require_assignee_or_admin(&user, &task)?;

    let updated = state.tasks.update_status(&id, status).await?;
    announce_completion(&state, &user, &task, &updated).await;

    Ok(Json(json!({ "success": true, "task": updated })))
}

/// PUT /api/tasks/:id/todo (assignee or admin)
///
/// Replaces the checklist; progress and status follow from it.
pub async fn update_checklist(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<ChecklistRequest>,
) -> ApiResult<Json<Value>> {
    let task = state.tasks.get(&id).await?;
    require_assignee_or_admin(&user, &task)?;

    let updated = state.tasks.update_checklist(&id, req.todo_checklist).await?;
    announce_completion(&state, &user, &task, &updated).await;

    Ok(Json(json!({ "success": true, "task": updated })))
}

/// GET /api/tasks/dashboard-data (admin)
pub async fn admin_dashboard(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    current.require_admin()?;
    let dashboard = state.tasks.dashboard(None, now()).await?;
    Ok(Json(json!({ "success": true, "dashboard": dashboard })))
}

/// GET /api/tasks/user-dashboard-data
pub async fn user_dashboard(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    let dashboard = state.tasks.dashboard(Some(&user.id), now()).await?;
    Ok(Json(json!({ "success": true, "dashboard": dashboard })))
}

/// POST /api/tasks/:id/comments
///
/// Mentions come from `@name` or `@id` tokens in the text plus the optional
/// `mentions` list. Each mentioned user other than the author gets one
/// `user_mentioned` event.
pub async fn add_comment(
    State(state): State<AppState>,
    Extension(CurrentUser(author)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<CommentRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let task = state.tasks.get(&id).await?;

    let mut tokens = mention_tokens(&req.content)?;
    tokens.extend(req.mentions);
    let tokens = normalize_targets(&tokens);
    let mentioned: Vec<String> = state
        .users
        .resolve_mentions(&tokens)
        .await?
        .into_iter()
        .filter(|m| *m != author.id)
        .collect();

    let at = now();
    let comment = state
        .tasks
        .add_comment(&task.id, &author.id, &req.content, at)
        .await?;

    let preview: String = comment.content.chars().take(MENTION_PREVIEW_CHARS).collect();
    for user in &mentioned {
        let event = NewEvent::new(EventType::UserMentioned)
            .actor(author.id.clone())
            .targets([user.clone()])
            .task(task.id.clone())
            .meta(json!({
                "commentId": comment.id,
                "commentContent": preview,
                "taskTitle": task.title,
            }));
        state.events.record(event, at).await;
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "comment": comment, "mentioned": mentioned })),
    ))
}

/// `task_assigned` for `assignees`, if any
async fn announce_assignment(
    state: &AppState,
    actor: &User,
    task: &Task,
    assignees: &[String],
    at: DateTime<Utc>,
) {
    if assignees.is_empty() {
        return;
    }
    let assigned = NewEvent::new(EventType::TaskAssigned)
        .actor(actor.id.clone())
        .targets(assignees.iter().cloned())
        .task(task.id.clone())
        .meta(json!({ "title": task.title, "dueDate": task.due_date }));
    state.events.record(assigned, at).await;
}

/// `task_completed` to the admins when `after` completed a task `before` had not
async fn announce_completion(state: &AppState, actor: &User, before: &Task, after: &Task) {
    if after.status != TaskStatus::Completed || before.status == TaskStatus::Completed {
        return;
    }
    let event = NewEvent::new(EventType::TaskCompleted)
        .actor(actor.id.clone())
        .task(after.id.clone())
        .meta(json!({ "title": after.title, "completedBy": actor.name }));
    state.events.record_for_admins(event, None, now()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mention_tokens_extracts_names_and_ids() {
        let tokens = mention_tokens("ping @Ada and @bob_2, cc @Ada; id @3f2a-99").unwrap();
        assert_eq!(tokens, vec!["Ada", "bob_2", "3f2a-99"]);
    }

    #[test]
    fn test_mention_tokens_ignores_bare_at() {
        assert!(mention_tokens("meet @ noon").unwrap().is_empty());
    }

    #[test]
    fn test_task_query_rejects_unknown_sort() {
        let query = TaskQuery {
            sort_by: Some("title".to_string()),
            ..Default::default()
        };
        assert!(query.into_filter().is_err());
    }
}

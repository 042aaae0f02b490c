//! Database models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Account role; admins receive audit notifications and may manage logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(Error::InvalidInput(format!("unknown role: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub last_login_date: Option<DateTime<Utc>>,
    pub login_streak: i64,
    pub absent_days: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            other => Err(Error::InvalidInput(format!("unknown attendance status: {}", other))),
        }
    }
}

/// One calendar day of attendance for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub date: NaiveDate,
    pub day: String,
    pub status: AttendanceStatus,
}

/// Kinds of entries in the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskCreated,
    TaskAssigned,
    TaskCompleted,
    UserMentioned,
    UserSignup,
    TaskOverdue,
    UserAbsent,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TaskCreated => "task_created",
            EventType::TaskAssigned => "task_assigned",
            EventType::TaskCompleted => "task_completed",
            EventType::UserMentioned => "user_mentioned",
            EventType::UserSignup => "user_signup",
            EventType::TaskOverdue => "task_overdue",
            EventType::UserAbsent => "user_absent",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_created" => Ok(EventType::TaskCreated),
            "task_assigned" => Ok(EventType::TaskAssigned),
            "task_completed" => Ok(EventType::TaskCompleted),
            "user_mentioned" => Ok(EventType::UserMentioned),
            "user_signup" => Ok(EventType::UserSignup),
            "task_overdue" => Ok(EventType::TaskOverdue),
            "user_absent" => Ok(EventType::UserAbsent),
            other => Err(Error::InvalidInput(format!("unknown event type: {}", other))),
        }
    }
}

/// Persisted event log entry
///
/// `targets` and `read_by` are sets; order is insertion order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub actor: Option<String>,
    pub targets: Vec<String>,
    pub task: Option<String>,
    pub meta: serde_json::Value,
    pub read_by: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn is_target(&self, user_id: &str) -> bool {
        self.targets.iter().any(|t| t == user_id)
    }

    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.iter().any(|r| r == user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in-progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(Error::InvalidInput(format!("unknown task status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(Error::InvalidInput(format!("unknown priority: {}", other))),
        }
    }
}

/// One checklist entry of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

/// Trim item texts and drop blank items
pub fn sanitize_checklist(items: Vec<TodoItem>) -> Vec<TodoItem> {
    items
        .into_iter()
        .map(|item| TodoItem {
            text: item.text.trim().to_string(),
            completed: item.completed,
        })
        .filter(|item| !item.text.is_empty())
        .collect()
}

/// Percentage of completed items, rounded; 0 for an empty checklist
pub fn checklist_progress(items: &[TodoItem]) -> i64 {
    if items.is_empty() {
        return 0;
    }
    let done = items.iter().filter(|i| i.completed).count() as f64;
    (done * 100.0 / items.len() as f64).round() as i64
}

impl TaskStatus {
    /// Status implied by checklist progress
    pub fn from_progress(progress: i64) -> Self {
        if progress >= 100 {
            TaskStatus::Completed
        } else if progress > 0 {
            TaskStatus::InProgress
        } else {
            TaskStatus::Pending
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub overdue_notified: bool,
    pub progress: i64,
    pub todo_checklist: Vec<TodoItem>,
    pub assigned_to: Vec<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn is_assignee(&self, user_id: &str) -> bool {
        self.assigned_to.iter().any(|a| a == user_id)
    }

    /// Checklist items marked done
    pub fn completed_items(&self) -> usize {
        self.todo_checklist.iter().filter(|i| i.completed).count()
    }

    /// Past due and not completed at `now`
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status != TaskStatus::Completed && self.due_date.is_some_and(|due| due < now)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub task: String,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trips_through_str() {
        for t in [
            EventType::TaskCreated,
            EventType::TaskAssigned,
            EventType::TaskCompleted,
            EventType::UserMentioned,
            EventType::UserSignup,
            EventType::TaskOverdue,
            EventType::UserAbsent,
        ] {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
            assert_eq!(serde_json::to_value(t).unwrap(), t.as_str());
        }
    }

    #[test]
    fn test_task_status_uses_hyphenated_wire_name() {
        assert_eq!(
            serde_json::to_value(TaskStatus::InProgress).unwrap(),
            "in-progress"
        );
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_priority_parse_is_case_insensitive() {
        assert_eq!("High".parse::<Priority>().unwrap(), Priority::High);
    }

    #[test]
    fn test_event_serializes_type_field() {
        let event = Event {
            id: "e1".into(),
            event_type: EventType::UserAbsent,
            actor: None,
            targets: vec!["u1".into()],
            task: None,
            meta: serde_json::json!({}),
            read_by: vec![],
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "user_absent");
        assert!(json["readBy"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_checklist_progress_and_status() {
        let items = sanitize_checklist(vec![
            TodoItem { text: " draft ".into(), completed: true },
            TodoItem { text: "   ".into(), completed: true },
            TodoItem { text: "review".into(), completed: false },
            TodoItem { text: "publish".into(), completed: false },
        ]);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].text, "draft");

        let progress = checklist_progress(&items);
        assert_eq!(progress, 33);
        assert_eq!(TaskStatus::from_progress(progress), TaskStatus::InProgress);
        assert_eq!(TaskStatus::from_progress(0), TaskStatus::Pending);
        assert_eq!(TaskStatus::from_progress(100), TaskStatus::Completed);
        assert_eq!(checklist_progress(&[]), 0);
    }
}

//! HTTP API handlers for taskpulse-server

pub mod account;
pub mod auth;
pub mod health;
pub mod jobs;
pub mod logs;
pub mod sse;
pub mod tasks;
pub mod users;

pub use account::{all_attendance, my_attendance, profile, sign_in, sign_up};
pub use auth::{auth_middleware, CurrentUser};
pub use health::health_routes;
pub use jobs::{run_attendance, run_overdue};
pub use logs::{
    admin_logs, bulk_delete, bulk_read, delete_log, mark_all_read, mark_read, unread_count,
    user_logs,
};
pub use sse::event_stream;
pub use tasks::{
    add_comment, admin_dashboard, create_task, delete_task, get_task, list_tasks, update_checklist,
    update_task, update_task_status, user_dashboard,
};
pub use users::{get_user, list_users};

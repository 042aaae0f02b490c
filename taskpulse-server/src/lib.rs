//! taskpulse-server library
//!
//! Login streaks, daily attendance, overdue task detection and the
//! notification log behind the TaskPulse HTTP API.

use axum::Router;
use chrono::FixedOffset;
use sqlx::SqlitePool;
use std::sync::Arc;
use taskpulse_common::cache::TtlCache;
use taskpulse_common::{ChannelRegistry, Notifier};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod attendance;
pub mod error;
pub mod overdue;
pub mod pagination;
pub mod scheduler;
pub mod store;
pub mod streak;

use attendance::AttendanceTracker;
use overdue::OverdueScanner;
use store::{EventStore, TaskRepo, UserRepo};
use streak::LoginService;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Per-user push channels backing `/api/events`
    pub registry: Arc<ChannelRegistry>,
    pub cache: Arc<TtlCache<serde_json::Value>>,
    pub users: UserRepo,
    pub tasks: TaskRepo,
    pub events: EventStore,
    pub logins: LoginService,
    pub attendance: Arc<AttendanceTracker>,
    pub overdue: Arc<OverdueScanner>,
    /// Reference timezone for calendar days
    pub timezone: FixedOffset,
    pub admin_join_code: Option<String>,
}

impl AppState {
    /// Wire every service onto one pool, cache and notifier
    ///
    /// `notifier` receives all pushes; in production it is `registry` itself.
    pub fn new(
        db: SqlitePool,
        notifier: Arc<dyn Notifier>,
        registry: Arc<ChannelRegistry>,
        timezone: FixedOffset,
        admin_join_code: Option<String>,
    ) -> Self {
        let cache = Arc::new(TtlCache::new());
        let users = UserRepo::new(db.clone());
        let tasks = TaskRepo::new(db.clone());
        let events = EventStore::new(db.clone(), notifier.clone(), cache.clone());
        let logins = LoginService::new(users.clone(), notifier.clone(), cache.clone(), timezone);
        let attendance = Arc::new(AttendanceTracker::new(
            users.clone(),
            events.clone(),
            notifier,
            cache.clone(),
            timezone,
        ));
        let overdue = Arc::new(OverdueScanner::new(tasks.clone(), users.clone(), events.clone()));

        Self {
            db,
            registry,
            cache,
            users,
            tasks,
            events,
            logins,
            attendance,
            overdue,
            timezone,
            admin_join_code,
        }
    }
}

/// Build application router
///
/// Everything under `/api` except sign-up requires a known `X-User-Id`.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{delete, get, post, put};

    // Protected routes (require a known user)
    let protected = Router::new()
        .route("/api/auth/sign-in", post(api::sign_in))
        .route("/api/auth/attendance", get(api::my_attendance))
        .route("/api/auth/attendance/all", get(api::all_attendance))
        .route("/api/auth/profile", get(api::profile))
        .route("/api/users", get(api::list_users))
        .route("/api/users/:id", get(api::get_user))
        .route("/api/tasks", get(api::list_tasks).post(api::create_task))
        .route("/api/tasks/dashboard-data", get(api::admin_dashboard))
        .route("/api/tasks/user-dashboard-data", get(api::user_dashboard))
        .route(
            "/api/tasks/:id",
            get(api::get_task)
                .put(api::update_task)
                .delete(api::delete_task),
        )
        .route("/api/tasks/:id/status", put(api::update_task_status))
        .route("/api/tasks/:id/todo", put(api::update_checklist))
        .route("/api/tasks/:id/comments", post(api::add_comment))
        .route("/api/logs/user", get(api::user_logs))
        .route("/api/logs/user/unread-count", get(api::unread_count))
        .route("/api/logs/user/read-all", put(api::mark_all_read))
        .route("/api/logs/admin", get(api::admin_logs))
        .route("/api/logs/admin/bulk-delete", post(api::bulk_delete))
        .route("/api/logs/admin/bulk-read", post(api::bulk_read))
        .route("/api/logs/:id/read", put(api::mark_read))
        .route("/api/logs/:id", delete(api::delete_log))
        .route("/api/admin/jobs/attendance", post(api::run_attendance))
        .route("/api/admin/jobs/overdue", post(api::run_overdue))
        .route("/api/events", get(api::event_stream))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    // Public routes (no identity)
    let public = Router::new()
        .route("/api/auth/sign-up", post(api::sign_up))
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

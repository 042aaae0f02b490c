//! Manual triggers for the scheduled jobs (admin)

use axum::{extract::State, Extension, Json};
use serde_json::{json, Value};
use taskpulse_common::time::now;
use tracing::info;

use crate::api::auth::CurrentUser;
use crate::error::ApiResult;
use crate::AppState;

/// POST /api/admin/jobs/attendance
pub async fn run_attendance(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    current.require_admin()?;
    info!("Attendance run triggered by {}", current.0.id);
    let report = state.attendance.run(now()).await?;
    Ok(Json(json!({ "success": true, "report": report })))
}

/// POST /api/admin/jobs/overdue
pub async fn run_overdue(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    current.require_admin()?;
    info!("Overdue scan triggered by {}", current.0.id);
    let report = state.overdue.run(now()).await?;
    Ok(Json(json!({ "success": true, "report": report })))
}

//! Sign-up, sign-in and attendance endpoints

use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use taskpulse_common::db::{AttendanceRecord, EventType, Role, User};
use taskpulse_common::time::now;
use taskpulse_common::Error;
use tracing::info;

use crate::api::auth::CurrentUser;
use crate::attendance::ATTENDANCE_CACHE_PREFIX;
use crate::error::ApiResult;
use crate::store::NewEvent;
use crate::AppState;

const ATTENDANCE_SUMMARY_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub admin_join_code: Option<String>,
}

/// One user's attendance as shown to themselves or to an admin
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub login_streak: i64,
    pub absent_days: i64,
    pub last_login_date: Option<chrono::DateTime<chrono::Utc>>,
    pub records: Vec<AttendanceRecord>,
}

impl AttendanceSummary {
    fn new(user: User, records: Vec<AttendanceRecord>) -> Self {
        Self {
            user_id: user.id,
            name: user.name,
            email: user.email,
            login_streak: user.login_streak,
            absent_days: user.absent_days,
            last_login_date: user.last_login_date,
            records,
        }
    }
}

/// POST /api/auth/sign-up
///
/// A matching `adminJoinCode` grants the admin role. Every existing admin is
/// told about the new account.
pub async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if req.name.trim().is_empty() || !req.email.contains('@') {
        return Err(Error::InvalidInput("name and a valid email are required".to_string()).into());
    }

    let role = match (&req.admin_join_code, &state.admin_join_code) {
        (None, _) => Role::User,
        (Some(given), Some(expected)) if given == expected => Role::Admin,
        (Some(_), _) => {
            return Err(Error::InvalidInput("Invalid admin join code".to_string()).into());
        }
    };

    let at = now();
    let user = state.users.create(&req.name, &req.email, role, at).await?;
    info!("New {} account {}", role.as_str(), user.id);

    let event = NewEvent::new(EventType::UserSignup)
        .actor(user.id.clone())
        .meta(json!({
            "userName": user.name,
            "userEmail": user.email,
            "role": role,
        }));
    state
        .events
        .record_for_admins(event, Some(user.id.as_str()), at)
        .await;
    state.cache.invalidate_by_prefix(ATTENDANCE_CACHE_PREFIX);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "user": user })),
    ))
}

/// POST /api/auth/sign-in
///
/// Credits the caller's login streak for today.
pub async fn sign_in(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    let outcome = state.logins.record_login(&user.id, now()).await?;
    Ok(Json(json!({
        "success": true,
        "user": outcome.user,
        "credit": outcome.credit,
    })))
}

/// GET /api/auth/profile
pub async fn profile(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<Value> {
    Json(json!({ "success": true, "user": user }))
}

/// GET /api/auth/attendance
pub async fn my_attendance(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    let records = state.users.attendance_records(&user.id).await?;
    Ok(Json(json!({
        "success": true,
        "attendance": AttendanceSummary::new(user, records),
    })))
}

/// GET /api/auth/attendance/all (admin)
pub async fn all_attendance(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    current.require_admin()?;

    let key = format!("{}all", ATTENDANCE_CACHE_PREFIX);
    let summaries = match state.cache.get(&key) {
        Some(cached) => cached,
        None => {
            let mut summaries = Vec::new();
            for user in state.users.list_all().await? {
                let records = state.users.attendance_records(&user.id).await?;
                summaries.push(AttendanceSummary::new(user, records));
            }
            let value = serde_json::to_value(summaries).map_err(Error::from)?;
            state.cache.set(key, value.clone(), ATTENDANCE_SUMMARY_TTL);
            value
        }
    };

    Ok(Json(json!({ "success": true, "users": summaries })))
}

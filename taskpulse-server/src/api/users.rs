//! User directory endpoints

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use taskpulse_common::db::{Role, User};

use crate::api::auth::CurrentUser;
use crate::error::ApiResult;
use crate::store::StatusCounts;
use crate::AppState;

/// A member with the state of the tasks assigned to them
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    #[serde(flatten)]
    pub user: User,
    pub tasks: StatusCounts,
}

/// GET /api/users (admin)
///
/// Every non-admin account with per-status task totals.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    current.require_admin()?;

    let mut members = Vec::new();
    for user in state.users.list_by_role(Role::User).await? {
        let tasks = state.tasks.status_counts(Some(&user.id)).await?;
        members.push(MemberSummary { user, tasks });
    }
    Ok(Json(json!({ "success": true, "users": members })))
}

/// GET /api/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    Extension(_current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = state.users.get(&id).await?;
    Ok(Json(json!({ "success": true, "user": user })))
}

//! Notification log endpoints

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde_json::{json, Value};
use taskpulse_common::time::now;
use taskpulse_common::Error;

use crate::api::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::pagination::PageRequest;
use crate::AppState;

/// Extract the `ids` array of a bulk request body
///
/// Accepts `{"ids": [..]}` with string entries only.
pub fn parse_ids(body: &Value) -> Result<Vec<String>, ApiError> {
    let invalid = || ApiError::BadRequest("Provide array of ids".to_string());

    let ids = body.get("ids").and_then(Value::as_array).ok_or_else(invalid)?;
    let ids = ids
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<String>>>()
        .ok_or_else(invalid)?;

    if ids.is_empty() {
        return Err(invalid());
    }
    Ok(ids)
}

/// GET /api/logs/user?page=&limit=
pub async fn user_logs(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(request): Query<PageRequest>,
) -> ApiResult<Json<Value>> {
    let page = state.events.list_for_user(&user.id, request).await?;
    Ok(Json(json!({
        "success": true,
        "logs": page.items,
        "pagination": page.pagination,
    })))
}

/// GET /api/logs/admin?page=&limit= (admin)
pub async fn admin_logs(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(request): Query<PageRequest>,
) -> ApiResult<Json<Value>> {
    current.require_admin()?;
    let page = state.events.list_all(&current.0.id, request).await?;
    Ok(Json(json!({
        "success": true,
        "logs": page.items,
        "pagination": page.pagination,
    })))
}

/// GET /api/logs/user/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    let count = state.events.unread_count(&user.id).await?;
    Ok(Json(json!({ "success": true, "count": count })))
}

/// PUT /api/logs/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let view = state.events.mark_read(&id, &user.id, now()).await?;
    Ok(Json(json!({ "success": true, "log": view })))
}

/// PUT /api/logs/user/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    let marked = state.events.mark_all_read(&user.id, now()).await?;
    Ok(Json(json!({ "success": true, "marked": marked })))
}

/// DELETE /api/logs/:id (target or admin)
pub async fn delete_log(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.events.delete(&id, &user).await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/logs/admin/bulk-delete (admin)
pub async fn bulk_delete(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    if !user.is_admin() {
        return Err(Error::Forbidden("Admin access required".to_string()).into());
    }
    let ids = parse_ids(&body)?;
    let outcome = state.events.bulk_delete(&ids, &user).await?;
    Ok(Json(json!({
        "success": true,
        "deleted": outcome.deleted,
        "targets": outcome.targets.len(),
        "notified": outcome.notified.len(),
    })))
}

/// POST /api/logs/admin/bulk-read (admin)
pub async fn bulk_read(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    if !user.is_admin() {
        return Err(Error::Forbidden("Admin access required".to_string()).into());
    }
    let ids = parse_ids(&body)?;
    let marked = state.events.admin_mark_read(&ids, &user, now()).await?;
    Ok(Json(json!({ "success": true, "marked": marked })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids_accepts_string_array() {
        let ids = parse_ids(&json!({ "ids": ["a", "b"] })).unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_ids_rejects_bad_shapes() {
        assert!(parse_ids(&json!({})).is_err());
        assert!(parse_ids(&json!({ "ids": [] })).is_err());
        assert!(parse_ids(&json!({ "ids": "a" })).is_err());
        assert!(parse_ids(&json!({ "ids": ["a", 3] })).is_err());
    }
}

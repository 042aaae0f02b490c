//! Request identity
//!
//! Callers identify themselves with the `X-User-Id` header. The middleware
//! resolves it to a stored user and hands it to handlers as [`CurrentUser`].

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use taskpulse_common::db::User;
use taskpulse_common::Error;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Header carrying the caller's user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller of a protected route
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    /// Fail with 403 unless the caller is an admin
    pub fn require_admin(&self) -> ApiResult<()> {
        if self.0.is_admin() {
            Ok(())
        } else {
            Err(Error::Forbidden("Admin access required".to_string()).into())
        }
    }
}

/// Authentication middleware
///
/// Returns 401 Unauthorized for a missing header or an unknown user.
/// Applied to protected routes only.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id = request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Missing X-User-Id header".to_string()))?
        .to_string();

    let user = state.users.find(&user_id).await?.ok_or_else(|| {
        debug!("Rejected unknown user id {}", user_id);
        ApiError::Unauthorized("Unknown user".to_string())
    })?;

    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

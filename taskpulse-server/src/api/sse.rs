//! Server-Sent Events for the caller's push channel

use crate::api::auth::CurrentUser;
use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
    Extension,
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /api/events - SSE stream of the caller's private channel
///
/// Streams `notification:*` and `user:*` pushes addressed to the caller,
/// preceded by a `ConnectionStatus` hello.
pub async fn event_stream(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.registry.subscribe(&user.id);
    taskpulse_common::sse::create_user_sse_stream(user.id, rx)
}

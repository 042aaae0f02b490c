//! Server-Sent Events (SSE) utilities
//!
//! Streams a user's private push channel to one HTTP client.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::events::PushMessage;

/// Convert one push message into an SSE event named after its kind
pub fn to_sse_event(message: &PushMessage) -> Option<Event> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Event::default().event(message.kind()).data(json)),
        Err(e) => {
            warn!("Failed to serialize {} push: {}", message.kind(), e);
            None
        }
    }
}

/// Create an SSE stream for one subscriber of a user channel
///
/// Sends a `ConnectionStatus` hello first, then every message received.
/// A lagging client skips the overwritten messages and keeps streaming.
pub fn create_user_sse_stream(
    user_id: String,
    mut rx: broadcast::Receiver<PushMessage>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected for user {}", user_id);

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match rx.recv().await {
                Ok(message) => {
                    debug!("SSE: sending {} to user {}", message.kind(), user_id);
                    if let Some(event) = to_sse_event(&message) {
                        yield Ok(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE client of user {} lagged; skipped {} message(s)", user_id, skipped);
                }
                Err(RecvError::Closed) => {
                    info!("SSE channel closed for user {}", user_id);
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

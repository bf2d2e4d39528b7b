//! Server-sent event streams.
//!
//! Each connection holds one bounded subscription. A client that falls
//! behind is disconnected by the engine and its stream ends; it is expected
//! to reconnect and reload through the listing endpoints.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use sendguard_core::broadcast::Subscription;
use serde::Serialize;

use crate::api::state::AppState;

fn event_stream<T>(
    subscription: Subscription<T>,
    name: &'static str,
    keepalive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Send + 'static,
{
    let stream = stream::unfold(subscription, move |mut subscription| async move {
        let value = subscription.recv().await?;
        let event = Event::default()
            .event(name)
            .json_data(&value)
            .unwrap_or_else(|e| Event::default().comment(format!("unserializable {name}: {e}")));
        Some((Ok(event), subscription))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(keepalive).text("ping"))
}

/// Newly recorded convictions.
pub async fn stream_convictions(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    event_stream(state.engine.convictions.subscribe(), "conviction", state.keepalive)
}

/// Campaign counter updates.
pub async fn stream_campaigns(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    event_stream(state.engine.tracker.subscribe(), "campaign", state.keepalive)
}

/// Narrated thoughts.
pub async fn stream_thoughts(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    event_stream(state.engine.thoughts.subscribe(), "thought", state.keepalive)
}

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use common::types::{PublicWagerId, WagerId};
use engine::FadeClient;
use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::watch;

use super::{ApiError, AppState, Session};

/// Emit the current value, then one event per change. `owner` keeps the
/// viewer (and its feed subscriptions) alive exactly as long as the stream.
fn view_stream<V, O>(
    owner: O,
    rx: watch::Receiver<V>,
    event: &'static str,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    V: Serialize + Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    stream::unfold((owner, rx, true), move |(owner, mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let view = rx.borrow_and_update().clone();
        let sse = Event::default()
            .event(event)
            .json_data(&view)
            .unwrap_or_else(|_| Event::default().event(event).data("{}"));
        Some((Ok(sse), (owner, rx, false)))
    })
}

/// Server-sent `FadeView` updates for the caller on one wager.
pub async fn stream_wager(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Session(session): Session,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let client = FadeClient::new(state.ledger.clone(), session);
    let viewer = client.watch(WagerId::new(id)).await?;
    let rx = viewer.subscribe_view();
    Ok(Sse::new(view_stream(viewer, rx, "fade_view")).keep_alive(KeepAlive::default()))
}

/// Server-sent `PublicFadeView` updates for a public wager.
pub async fn stream_public_wager(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Session(session): Session,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let viewer = state.quota.watch(PublicWagerId::new(id), session).await?;
    let rx = viewer.subscribe_view();
    Ok(Sse::new(view_stream(viewer, rx, "public_fade_view")).keep_alive(KeepAlive::default()))
}

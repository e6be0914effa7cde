use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use tokio::sync::mpsc;

use crate::controllers::live_stream::sse_from_subscription;
use crate::realtime::feeds::subscribe_to_polls;
use crate::state::AppState;
use crate::utils::error::AppResult;

/// Full poll list on connect and after every vote, close or delete.
pub async fn polls_stream(
    State(state): State<AppState>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = subscribe_to_polls(&state.hub, move |polls| {
        let _ = tx.send(polls);
    })
    .await?;

    Ok(sse_from_subscription(rx, subscription))
}

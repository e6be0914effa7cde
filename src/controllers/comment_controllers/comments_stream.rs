use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use tokio::sync::mpsc;

use crate::controllers::live_stream::sse_from_subscription;
use crate::realtime::feeds::subscribe_to_comments;
use crate::state::AppState;
use crate::utils::error::AppResult;

pub async fn comments_stream(
    Path(target_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = subscribe_to_comments(&state.hub, &target_id, move |comments| {
        let _ = tx.send(comments);
    })
    .await?;

    Ok(sse_from_subscription(rx, subscription))
}

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use tokio::sync::mpsc;

use crate::controllers::live_stream::sse_from_subscription;
use crate::realtime::feeds::subscribe_to_dashboard_stats;
use crate::state::AppState;
use crate::utils::error::AppResult;

/// Headline counters; first event arrives once users, courses, exams and
/// approved payments have all been read.
pub async fn dashboard_stream(
    State(state): State<AppState>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = subscribe_to_dashboard_stats(&state.hub, move |stats| {
        let _ = tx.send(stats);
    })
    .await?;

    Ok(sse_from_subscription(rx, subscription))
}

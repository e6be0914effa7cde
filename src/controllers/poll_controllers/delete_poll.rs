use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

use crate::state::AppState;
use crate::utils::error::AppResult;

pub async fn delete_poll(
    Path(poll_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<StatusCode> {
    state.polls.delete_poll(&poll_id).await?;
    info!(poll_id = %poll_id, "poll deleted");
    Ok(StatusCode::NO_CONTENT)
}

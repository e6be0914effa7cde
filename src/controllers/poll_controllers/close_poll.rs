use axum::{
    extract::{Path, State},
    http::StatusCode,
};

use crate::state::AppState;
use crate::utils::error::AppResult;

pub async fn close_poll(
    Path(poll_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<StatusCode> {
    state.polls.close_poll(&poll_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

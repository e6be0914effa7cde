use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::db::store::Versioned;
use crate::models::poll_models::Poll;
use crate::services::voting::NewPoll;
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::session::Claims;

pub async fn create_poll(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<NewPoll>,
) -> AppResult<(StatusCode, Json<Versioned<Poll>>)> {
    let poll = state.polls.create_poll(payload, &claims.sub).await?;
    info!(poll_id = %poll.id, created_by = %claims.sub, "poll created");

    Ok((StatusCode::CREATED, Json(poll)))
}

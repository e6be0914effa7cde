use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};

use crate::controllers::poll_controllers::models::CastVoteRequest;
use crate::services::error::VoteOutcome;
use crate::state::AppState;
use crate::utils::error::mutation_status;
use crate::utils::session::Claims;

/// Always answers with a `VoteOutcome`; the status code mirrors the failure
/// kind so HTTP clients can branch without parsing the message.
pub async fn cast_vote(
    Path(poll_id): Path<String>,
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CastVoteRequest>,
) -> (StatusCode, Json<VoteOutcome>) {
    let outcome = state
        .polls
        .vote_on_poll(&poll_id, &payload.option_id, &claims.sub)
        .await;

    let status = outcome
        .rejection
        .as_ref()
        .map_or(StatusCode::OK, mutation_status);

    (status, Json(outcome))
}

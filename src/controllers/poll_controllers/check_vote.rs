use axum::{
    extract::{Extension, Path, State},
    Json,
};

use crate::controllers::poll_controllers::models::VoteCheckResponse;
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::session::Claims;

pub async fn check_user_vote(
    Path(poll_id): Path<String>,
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<VoteCheckResponse>> {
    let option_id = state.polls.check_user_vote(&poll_id, &claims.sub).await?;

    Ok(Json(VoteCheckResponse {
        has_voted: option_id.is_some(),
        option_id,
    }))
}

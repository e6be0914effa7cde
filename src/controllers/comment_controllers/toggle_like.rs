use axum::{
    extract::{Extension, Path, State},
    Json,
};

use crate::services::comments::LikeState;
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::session::Claims;

pub async fn toggle_like(
    Path(comment_id): Path<String>,
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<LikeState>> {
    let like_state = state.comments.toggle_like(&comment_id, &claims.sub).await?;
    Ok(Json(like_state))
}

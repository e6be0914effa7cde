use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
};

use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::session::Claims;

/// Authors may delete their own comments; admins may delete any.
pub async fn delete_comment(
    Path(comment_id): Path<String>,
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<StatusCode> {
    state.comments.delete_comment(&comment_id, &claims).await?;
    Ok(StatusCode::NO_CONTENT)
}

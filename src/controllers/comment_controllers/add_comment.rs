use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};

use crate::db::store::Versioned;
use crate::models::comment_models::Comment;
use crate::services::comments::NewComment;
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::session::Claims;

pub async fn add_comment(
    Path(target_id): Path<String>,
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<NewComment>,
) -> AppResult<(StatusCode, Json<Versioned<Comment>>)> {
    let comment = state
        .comments
        .add_comment(&target_id, &claims, payload)
        .await?;

    Ok((StatusCode::CREATED, Json(comment)))
}

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::controllers::comment_controllers::{
    add_comment, comments_stream, delete_comment, toggle_like,
};
use crate::middleware::jwt::jwt_auth;
use crate::state::AppState;

pub fn comment_routes(state: AppState) -> Router {
    Router::new()
        .route("/:target_id", post(add_comment::add_comment))
        .route("/:target_id/stream", get(comments_stream::comments_stream))
        .route("/item/:comment_id", delete(delete_comment::delete_comment))
        .route("/item/:comment_id/like", post(toggle_like::toggle_like))
        .route_layer(middleware::from_fn_with_state(state.clone(), jwt_auth))
        .with_state(state)
}

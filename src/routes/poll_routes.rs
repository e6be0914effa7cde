use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::controllers::poll_controllers::{
    cast_vote, check_vote, close_poll, create_poll, delete_poll, polls_stream,
};
use crate::middleware::jwt::{jwt_auth, require_admin};
use crate::state::AppState;

pub fn poll_routes(state: AppState) -> Router {
    let admin = Router::new()
        .route("/", post(create_poll::create_poll))
        .route("/:poll_id", delete(delete_poll::delete_poll))
        .route("/:poll_id/close", post(close_poll::close_poll))
        .route_layer(middleware::from_fn(require_admin));

    Router::new()
        .route("/stream", get(polls_stream::polls_stream))
        .route(
            "/:poll_id/vote",
            post(cast_vote::cast_vote).get(check_vote::check_user_vote),
        )
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(state.clone(), jwt_auth))
        .with_state(state)
}

pub mod analytics_routes;
pub mod comment_routes;
pub mod poll_routes;

use axum::Router;

use crate::state::AppState;

/// Every `/api` route, without the outer CORS and trace layers.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/polls", poll_routes::poll_routes(state.clone()))
        .nest("/api/comments", comment_routes::comment_routes(state.clone()))
        .nest("/api/analytics", analytics_routes::analytics_routes(state))
}

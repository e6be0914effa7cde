use axum::{middleware, routing::get, Router};

use crate::controllers::analytics_controllers::{analytics_socket, dashboard_stream};
use crate::middleware::jwt::{jwt_auth, require_admin};
use crate::state::AppState;

/// Admin only.
pub fn analytics_routes(state: AppState) -> Router {
    Router::new()
        .route("/dashboard/stream", get(dashboard_stream::dashboard_stream))
        .route("/live", get(analytics_socket::analytics_socket))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(state.clone(), jwt_auth))
        .with_state(state)
}

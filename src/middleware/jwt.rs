use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;

use crate::state::AppState;
use crate::utils::{
    error::AppError,
    session::{verify_token, Claims},
};

pub async fn jwt_auth(
    State(state): State<AppState>,
    cookie_jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = cookie_jar
        .get("token")
        .map(|cookie| cookie.value().to_string())
        .ok_or_else(|| AppError::AuthenticationError("No token found".to_string()))?;

    let claims = verify_token(&token, &state.config.session_secret).map_err(|e| {
        debug!("Rejected token: {}", e);
        AppError::AuthenticationError("Invalid or expired token".to_string())
    })?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Must run inside `jwt_auth`.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    let is_admin = req
        .extensions()
        .get::<Claims>()
        .is_some_and(Claims::is_admin);

    if !is_admin {
        return Err(AppError::Forbidden("Admin role required".to_string()));
    }

    Ok(next.run(req).await)
}

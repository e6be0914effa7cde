use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

use crate::db::store::StoreError;
use crate::services::error::MutationError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug)]
pub enum AppError {
    DatabaseError(String),
    ValidationError(String),
    AuthenticationError(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::AuthenticationError(msg) => write!(f, "Authentication error: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            AppError::DatabaseError(msg) => {
                error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "Database operation failed".to_string(),
                )
            }
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            AppError::AuthenticationError(msg) => {
                (StatusCode::UNAUTHORIZED, "AUTHENTICATION_ERROR", msg)
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg)
            }
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
            details: None,
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// HTTP status matching a mutation failure.
pub fn mutation_status(err: &MutationError) -> StatusCode {
    match err {
        MutationError::PollNotFound | MutationError::CommentNotFound => StatusCode::NOT_FOUND,
        MutationError::AlreadyVoted | MutationError::Conflict { .. } => StatusCode::CONFLICT,
        MutationError::PollClosed(_)
        | MutationError::OptionNotFound
        | MutationError::InvalidParent
        | MutationError::Validation(_) => StatusCode::BAD_REQUEST,
        MutationError::Forbidden => StatusCode::FORBIDDEN,
        MutationError::TransportInterrupted => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl From<MutationError> for AppError {
    fn from(err: MutationError) -> Self {
        let message = err.to_string();
        match mutation_status(&err) {
            StatusCode::NOT_FOUND => AppError::NotFound(message),
            StatusCode::CONFLICT => AppError::Conflict(message),
            StatusCode::FORBIDDEN => AppError::Forbidden(message),
            StatusCode::SERVICE_UNAVAILABLE => AppError::ServiceUnavailable(message),
            _ => match err {
                MutationError::Validation(_) => AppError::ValidationError(message),
                _ => AppError::BadRequest(message),
            },
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => {
                error!("Store unavailable: {}", msg);
                AppError::ServiceUnavailable("Live data is temporarily unavailable".to_string())
            }
            other => AppError::DatabaseError(other.to_string()),
        }
    }
}

//! Application error types.

use agora_core::auth::AuthError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.as_str()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str()),
            AppError::Internal(detail) => {
                error!(detail = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => AppError::Unauthorized("Invalid credentials".into()),
            AuthError::AlreadyExists => AppError::Conflict("Account already exists".into()),
            AuthError::ReservedIdentity => {
                AppError::Forbidden("This identity cannot be registered".into())
            }
            AuthError::Forbidden => AppError::Forbidden("Not allowed".into()),
            AuthError::NotFound => AppError::NotFound("Account not found".into()),
            AuthError::InvalidRefreshToken => {
                AppError::Unauthorized("Invalid refresh token".into())
            }
            AuthError::InvalidCode => AppError::Validation("Invalid verification code".into()),
            AuthError::Expired => AppError::Validation("Verification code has expired".into()),
            AuthError::AlreadyUsed => {
                AppError::Validation("Verification code was already used".into())
            }
            AuthError::DuplicateTokenId => AppError::Internal("duplicate refresh token id".into()),
            AuthError::Validation(msg) => AppError::Validation(msg),
            AuthError::Config(msg) => AppError::Internal(format!("configuration: {msg}")),
            AuthError::Store(e) => AppError::Internal(format!("store: {e}")),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

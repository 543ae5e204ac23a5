//! Authentication request handlers.

use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    AuthUser, ConfirmPasswordResetRequest, LoginRequest, LogoutAllResponse, LogoutRequest,
    RefreshRequest, RegisterRequest, RequestPasswordResetRequest, ResetPasswordRequest,
    SuccessResponse, TokenResponse, VerifyResetCodeRequest,
};
use crate::services::auth;

/// `POST /auth/register`: create a new account.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<Json<TokenResponse>> {
    let resp = auth::register(&state.sessions, body).await?;
    Ok(Json(resp))
}

/// `POST /auth/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let resp = auth::login(&state.sessions, body).await?;
    Ok(Json(resp))
}

/// `POST /auth/refresh`: exchange a refresh token for a new token pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let resp = auth::refresh(&state.sessions, &body.refresh_token).await?;
    Ok(Json(resp))
}

/// `POST /auth/logout`: revoke one refresh token.
pub async fn logout_handler(
    State(state): State<AppState>,
    Json(body): Json<LogoutRequest>,
) -> AppResult<Json<SuccessResponse>> {
    let resp = auth::logout(&state.sessions, body.refresh_token.as_deref()).await?;
    Ok(Json(resp))
}

/// `POST /auth/logout-all`: revoke every session of the caller.
pub async fn logout_all_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> AppResult<Json<LogoutAllResponse>> {
    let resp = auth::logout_all(&state.sessions, &user.requester()).await?;
    Ok(Json(resp))
}

/// `GET /auth/me`: profile of the caller.
pub async fn me_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> AppResult<Json<AuthUser>> {
    let resp = auth::me(&state.sessions, &user.0.email).await?;
    Ok(Json(resp))
}

/// `POST /auth/reset-password`: change a password (own, or any as root).
pub async fn reset_password_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<Json<SuccessResponse>> {
    let resp = auth::reset_password(&state.sessions, body, &user.requester()).await?;
    Ok(Json(resp))
}

/// `POST /auth/request-password-reset`: start the forgot-password flow.
pub async fn request_password_reset_handler(
    State(state): State<AppState>,
    Json(body): Json<RequestPasswordResetRequest>,
) -> AppResult<Json<SuccessResponse>> {
    let resp = auth::request_password_reset(&state.sessions, &body.email).await?;
    Ok(Json(resp))
}

/// `POST /auth/verify-reset-code`: check a reset code without using it.
pub async fn verify_reset_code_handler(
    State(state): State<AppState>,
    Json(body): Json<VerifyResetCodeRequest>,
) -> AppResult<Json<SuccessResponse>> {
    let resp = auth::verify_reset_code(&state.sessions, body).await?;
    Ok(Json(resp))
}

/// `POST /auth/confirm-password-reset`: set a new password with a reset code.
pub async fn confirm_password_reset_handler(
    State(state): State<AppState>,
    Json(body): Json<ConfirmPasswordResetRequest>,
) -> AppResult<Json<SuccessResponse>> {
    let resp = auth::confirm_password_reset(&state.sessions, body).await?;
    Ok(Json(resp))
}

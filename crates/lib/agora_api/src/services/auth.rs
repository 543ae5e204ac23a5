//! Authentication service: maps `agora_core` session operations onto API
//! request/response models.

use agora_core::auth::AuthError;
use agora_core::auth::session::{Registration, SessionService};
use agora_core::models::auth::{Requester, Session, TokenPair};

use crate::error::AppResult;
use crate::models::{
    AuthUser, ConfirmPasswordResetRequest, LoginRequest, LogoutAllResponse, RegisterRequest,
    ResetPasswordRequest, SuccessResponse, TokenResponse, VerifyResetCodeRequest,
};

/// Same answer for known and unknown accounts.
pub const RESET_REQUESTED_MESSAGE: &str = "If the account exists, a reset code has been sent";

fn token_response(
    sessions: &SessionService,
    tokens: TokenPair,
    user: Option<AuthUser>,
) -> TokenResponse {
    TokenResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_in: sessions.tokens().access_ttl().num_seconds(),
        token_type: "Bearer".to_string(),
        user,
    }
}

fn session_response(sessions: &SessionService, session: Session) -> TokenResponse {
    token_response(sessions, session.tokens, Some(session.account.into()))
}

/// A reset-code lookup that finds nothing is reported as a wrong code, so
/// callers cannot learn whether a code was ever issued for an address.
fn conceal_missing_code(e: AuthError) -> AuthError {
    match e {
        AuthError::NotFound => AuthError::InvalidCode,
        other => other,
    }
}

pub async fn register(sessions: &SessionService, body: RegisterRequest) -> AppResult<TokenResponse> {
    let session = sessions
        .register(Registration {
            name: body.name,
            email: body.email,
            password: body.password,
            secondary_id: body.secondary_id,
        })
        .await?;
    Ok(session_response(sessions, session))
}

pub async fn login(sessions: &SessionService, body: LoginRequest) -> AppResult<TokenResponse> {
    let session = sessions.login(&body.email, &body.password).await?;
    Ok(session_response(sessions, session))
}

pub async fn refresh(sessions: &SessionService, refresh_token: &str) -> AppResult<TokenResponse> {
    let tokens = sessions.refresh(refresh_token).await?;
    Ok(token_response(sessions, tokens, None))
}

pub async fn logout(
    sessions: &SessionService,
    refresh_token: Option<&str>,
) -> AppResult<SuccessResponse> {
    if let Some(token) = refresh_token {
        sessions.logout(token).await?;
    }
    Ok(SuccessResponse::new("Logged out"))
}

pub async fn logout_all(
    sessions: &SessionService,
    requester: &Requester,
) -> AppResult<LogoutAllResponse> {
    let revoked = sessions.logout_all(requester).await?;
    Ok(LogoutAllResponse {
        success: true,
        revoked,
    })
}

pub async fn me(sessions: &SessionService, email: &str) -> AppResult<AuthUser> {
    Ok(sessions.me(email).await?.into())
}

pub async fn reset_password(
    sessions: &SessionService,
    body: ResetPasswordRequest,
    requester: &Requester,
) -> AppResult<SuccessResponse> {
    sessions
        .reset_password(&body.email, &body.new_password, requester)
        .await?;
    Ok(SuccessResponse::new("Password updated"))
}

pub async fn request_password_reset(
    sessions: &SessionService,
    email: &str,
) -> AppResult<SuccessResponse> {
    sessions.request_password_reset(email).await?;
    Ok(SuccessResponse::new(RESET_REQUESTED_MESSAGE))
}

pub async fn verify_reset_code(
    sessions: &SessionService,
    body: VerifyResetCodeRequest,
) -> AppResult<SuccessResponse> {
    sessions
        .verify_reset_code(&body.email, &body.code)
        .await
        .map_err(conceal_missing_code)?;
    Ok(SuccessResponse::new("Code verified"))
}

pub async fn confirm_password_reset(
    sessions: &SessionService,
    body: ConfirmPasswordResetRequest,
) -> AppResult<SuccessResponse> {
    sessions
        .confirm_password_reset(&body.email, &body.code, &body.new_password)
        .await
        .map_err(conceal_missing_code)?;
    Ok(SuccessResponse::new("Password updated"))
}

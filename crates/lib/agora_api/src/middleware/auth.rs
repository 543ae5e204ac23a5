//! Authentication middleware: Bearer token extraction and JWT verification.

use agora_core::models::auth::{AccessClaims, Requester};
use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::AppState;
use crate::error::AppError;

/// Key used to store verified `AccessClaims` in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub AccessClaims);

impl AuthenticatedUser {
    pub fn requester(&self) -> Requester {
        Requester::from(&self.0)
    }
}

/// Axum middleware: extracts `Authorization: Bearer <token>`, verifies the
/// access token, and injects `AuthenticatedUser` into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()))?;

    let claims = state
        .sessions
        .tokens()
        .verify_access(token)
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))?;

    request.extensions_mut().insert(AuthenticatedUser(claims));

    Ok(next.run(request).await)
}

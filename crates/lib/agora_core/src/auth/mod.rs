//! Authentication and session lifecycle.
//!
//! Provides password hashing, JWT issuance, the refresh-token ledger, reset
//! codes and the `SessionService` that orchestrates them. Persistence goes
//! through the collaborator traits in [`accounts`], [`ledger`] and
//! [`reset_codes`]; PostgreSQL implementations live in [`queries`], in-memory
//! ones next to each trait.

pub mod accounts;
pub mod dispatch;
pub mod jwt;
pub mod ledger;
pub mod password;
pub mod queries;
pub mod reset_codes;
pub mod session;

#[cfg(test)]
mod tests;

use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account already exists")]
    AlreadyExists,

    #[error("Identity is reserved")]
    ReservedIdentity,

    #[error("Forbidden")]
    Forbidden,

    #[error("Not found")]
    NotFound,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Verification code has expired")]
    Expired,

    #[error("Verification code was already used")]
    AlreadyUsed,

    /// Refresh-token identifier collision. Statistically impossible at the
    /// identifier size in use, so it is treated as an invariant violation.
    #[error("Duplicate refresh token id")]
    DuplicateTokenId,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Canonical form of an email address: trimmed and lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

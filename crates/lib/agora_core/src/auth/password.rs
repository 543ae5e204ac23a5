//! Password hashing via bcrypt.

use super::{AuthError, AuthResult};

/// bcrypt cost factor used in production.
pub const BCRYPT_COST: u32 = 10;

/// Salted one-way password hashing. Holds no shared state, so hashing can
/// run on any blocking thread without coordination.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a password with bcrypt. Empty input is rejected.
    pub fn hash(&self, password: &str) -> AuthResult<String> {
        if password.is_empty() {
            return Err(AuthError::Validation("password must not be empty".into()));
        }
        bcrypt::hash(password, self.cost)
            .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
    }

    /// Verify a password against a bcrypt hash. A malformed hash is a
    /// mismatch, not an error.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or(false)
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(BCRYPT_COST)
    }
}

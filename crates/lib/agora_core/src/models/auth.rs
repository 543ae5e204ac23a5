//! Authentication domain models.
//!
//! These are internal domain models, distinct from the API request/response
//! models (which have `#[serde(rename_all = "camelCase")]` etc.).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account role, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Provider,
    Admin,
    Root,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Provider => "provider",
            Role::Admin => "admin",
            Role::Root => "root",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "provider" => Ok(Role::Provider),
            "admin" => Ok(Role::Admin),
            "root" => Ok(Role::Root),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Stored account, keyed by normalized email.
#[derive(Debug, Clone)]
pub struct Account {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    /// Secondary identifier (national ID), unique when present.
    pub secondary_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Public projection, never carries the password hash.
    pub fn view(&self) -> AccountView {
        AccountView {
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            secondary_id: self.secondary_id.clone(),
        }
    }
}

/// Account fields safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub secondary_id: Option<String>,
}

/// Allow-listed mutable account fields. Anything not listed here (email,
/// name, role, secondary identifier) cannot be changed through an update.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub password_hash: Option<String>,
}

impl AccountUpdate {
    pub fn password(hash: String) -> Self {
        Self {
            password_hash: Some(hash),
        }
    }
}

/// The authenticated caller of a privileged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub email: String,
    pub role: Role,
}

impl From<&AccessClaims> for Requester {
    fn from(claims: &AccessClaims) -> Self {
        Self {
            email: claims.email.clone(),
            role: claims.role,
        }
    }
}

/// Refresh token record stored in the ledger.
#[derive(Debug, Clone)]
pub struct RefreshRecord {
    /// Token identifier (the JWT `jti` claim).
    pub token_id: String,
    pub email: String,
    /// SHA-256 hex digest of the exact token string handed to the client.
    pub token_hash: String,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One-time password reset code, one per account.
#[derive(Debug, Clone)]
pub struct ResetRecord {
    pub email: String,
    /// Six decimal digits.
    pub code: String,
    /// Unix epoch milliseconds.
    pub expires_at: i64,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub email: String,
    pub role: Role,
    pub name: String,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
}

/// JWT claims embedded in refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject: account email.
    pub sub: String,
    /// Token identifier, primary key of the ledger record.
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
}

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Result of register/login: tokens plus the public account view.
#[derive(Debug, Clone)]
pub struct Session {
    pub tokens: TokenPair,
    pub account: AccountView,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::User, Role::Provider, Role::Admin, Role::Root] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Provider).unwrap(), "\"provider\"");
    }

    #[test]
    fn view_omits_password_hash() {
        let account = Account {
            email: "alice@x.com".into(),
            name: "Alice".into(),
            password_hash: "$2b$04$secret".into(),
            role: Role::User,
            secondary_id: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&account.view()).unwrap();
        assert!(!json.contains("secret"));
    }
}

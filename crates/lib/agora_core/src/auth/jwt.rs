//! JWT token issuance and verification.
//!
//! Access and refresh tokens are signed with distinct HS256 secrets, so a
//! leaked key of one class cannot forge tokens of the other.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::{AuthError, AuthResult};
use crate::models::auth::{AccessClaims, Account, RefreshClaims};

/// Default access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60;

/// Default refresh token lifetime: 30 days.
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Random bytes behind each refresh token id (192 bits).
const TOKEN_ID_BYTES: usize = 24;

/// A signed refresh token together with its ledger identifier.
#[derive(Debug, Clone)]
pub struct IssuedRefresh {
    pub token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies access and refresh tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    access_secret: Vec<u8>,
    refresh_secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Build an issuer. Fails if either secret is empty, the secrets are
    /// identical, or a TTL is not positive.
    pub fn new(
        access_secret: &[u8],
        refresh_secret: &[u8],
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> AuthResult<Self> {
        if access_secret.is_empty() || refresh_secret.is_empty() {
            return Err(AuthError::Config("token secrets must not be empty".into()));
        }
        if access_secret == refresh_secret {
            return Err(AuthError::Config(
                "access and refresh secrets must differ".into(),
            ));
        }
        if access_ttl <= Duration::zero() || refresh_ttl <= Duration::zero() {
            return Err(AuthError::Config("token TTLs must be positive".into()));
        }
        Ok(Self {
            access_secret: access_secret.to_vec(),
            refresh_secret: refresh_secret.to_vec(),
            access_ttl,
            refresh_ttl,
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign an access token carrying `{email, role, name}`.
    pub fn issue_access(&self, account: &Account) -> AuthResult<String> {
        let now = Utc::now();
        let claims = AccessClaims {
            email: account.email.clone(),
            role: account.role,
            name: account.name.clone(),
            exp: (now + self.access_ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.access_secret),
        )
        .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
    }

    /// Sign a refresh token carrying `{sub, jti}` with a fresh random id.
    pub fn issue_refresh(&self, account: &Account) -> AuthResult<IssuedRefresh> {
        let now = Utc::now();
        let expires_at = now + self.refresh_ttl;
        let token_id = generate_token_id();
        let claims = RefreshClaims {
            sub: account.email.clone(),
            jti: token_id.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.refresh_secret),
        )
        .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))?;
        Ok(IssuedRefresh {
            token,
            token_id,
            expires_at,
        })
    }

    /// Verify an access token's signature and expiry.
    pub fn verify_access(&self, token: &str) -> Option<AccessClaims> {
        verify::<AccessClaims>(token, &self.access_secret)
    }

    /// Verify a refresh token's signature and expiry.
    pub fn verify_refresh(&self, token: &str) -> Option<RefreshClaims> {
        verify::<RefreshClaims>(token, &self.refresh_secret)
    }
}

fn verify<T: serde::de::DeserializeOwned>(token: &str, secret: &[u8]) -> Option<T> {
    let key = DecodingKey::from_secret(secret);
    let mut validation = Validation::default();
    validation.validate_exp = true;
    decode::<T>(token, &key, &validation)
        .ok()
        .map(|data| data.claims)
}

/// URL-safe random token identifier.
fn generate_token_id() -> String {
    let mut bytes = [0u8; TOKEN_ID_BYTES];
    rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hash a token for storage comparison.
pub fn hash_for_storage(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parse a TTL such as `15m`, `12h`, `30d`, `90s` or a bare number of seconds.
pub fn parse_ttl(value: &str) -> AuthResult<Duration> {
    let value = value.trim();
    let invalid = || AuthError::Config(format!("invalid TTL '{value}'"));
    let (digits, unit) = match value.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&value[..idx], Some(c)),
        Some(_) => (value, None),
        None => return Err(invalid()),
    };
    let n: i64 = digits.parse().map_err(|_| invalid())?;
    if n <= 0 {
        return Err(invalid());
    }
    match unit {
        None | Some('s') => Ok(Duration::seconds(n)),
        Some('m') => Ok(Duration::minutes(n)),
        Some('h') => Ok(Duration::hours(n)),
        Some('d') => Ok(Duration::days(n)),
        Some(_) => Err(invalid()),
    }
}

/// Resolve the access-token secret: `JWT_SECRET` → `AUTH_SECRET` → persisted file.
pub fn resolve_access_secret() -> String {
    resolve_secret(&["JWT_SECRET", "AUTH_SECRET"], &secret_path("jwt-secret"))
}

/// Resolve the refresh-token secret: `REFRESH_JWT_SECRET` → persisted file.
pub fn resolve_refresh_secret() -> String {
    resolve_secret(&["REFRESH_JWT_SECRET"], &secret_path("refresh-jwt-secret"))
}

/// First non-empty env var in `vars`, else the contents of `path`, else a
/// freshly generated secret persisted to `path`.
pub fn resolve_secret(vars: &[&str], path: &Path) -> String {
    for var in vars {
        if let Ok(secret) = std::env::var(var)
            && !secret.is_empty()
        {
            return secret;
        }
    }
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match std::fs::write(path, &secret) {
        Ok(()) => info!(path = %path.display(), "generated new signing secret"),
        Err(e) => warn!(path = %path.display(), error = %e, "could not persist signing secret"),
    }
    secret
}

/// Path to a persisted secret file.
fn secret_path(name: &str) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agora")
        .join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::auth::Role;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(
            b"access-secret",
            b"refresh-secret",
            Duration::minutes(15),
            Duration::days(30),
        )
        .unwrap()
    }

    fn account() -> Account {
        Account {
            email: "alice@x.com".into(),
            name: "Alice".into(),
            password_hash: String::new(),
            role: Role::Provider,
            secondary_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn access_token_carries_identity_claims() {
        let issuer = issuer();
        let token = issuer.issue_access(&account()).unwrap();
        let claims = issuer.verify_access(&token).unwrap();
        assert_eq!(claims.email, "alice@x.com");
        assert_eq!(claims.role, Role::Provider);
        assert_eq!(claims.name, "Alice");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn refresh_token_carries_subject_and_id() {
        let issuer = issuer();
        let issued = issuer.issue_refresh(&account()).unwrap();
        let claims = issuer.verify_refresh(&issued.token).unwrap();
        assert_eq!(claims.sub, "alice@x.com");
        assert_eq!(claims.jti, issued.token_id);
    }

    #[test]
    fn token_ids_are_unique_and_url_safe() {
        let issuer = issuer();
        let a = issuer.issue_refresh(&account()).unwrap().token_id;
        let b = issuer.issue_refresh(&account()).unwrap().token_id;
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn token_classes_do_not_cross_verify() {
        let issuer = issuer();
        let access = issuer.issue_access(&account()).unwrap();
        let refresh = issuer.issue_refresh(&account()).unwrap().token;
        assert!(issuer.verify_refresh(&access).is_none());
        assert!(issuer.verify_access(&refresh).is_none());
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let other = TokenIssuer::new(
            b"other-access",
            b"other-refresh",
            Duration::minutes(15),
            Duration::days(30),
        )
        .unwrap();
        let token = other.issue_access(&account()).unwrap();
        assert!(issuer().verify_access(&token).is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            email: "alice@x.com".into(),
            role: Role::User,
            name: "Alice".into(),
            exp: now - 3600,
            iat: now - 7200,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"access-secret"),
        )
        .unwrap();
        assert!(issuer().verify_access(&token).is_none());
    }

    #[test]
    fn identical_secrets_are_rejected() {
        let err = TokenIssuer::new(b"same", b"same", Duration::minutes(1), Duration::days(1));
        assert!(matches!(err, Err(AuthError::Config(_))));
    }

    #[test]
    fn storage_hash_is_deterministic_hex() {
        let a = hash_for_storage("token");
        assert_eq!(a, hash_for_storage("token"));
        assert_ne!(a, hash_for_storage("token2"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn parse_ttl_units() {
        assert_eq!(parse_ttl("15m").unwrap(), Duration::minutes(15));
        assert_eq!(parse_ttl("7d").unwrap(), Duration::days(7));
        assert_eq!(parse_ttl("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_ttl("90").unwrap(), Duration::seconds(90));
        assert!(parse_ttl("").is_err());
        assert!(parse_ttl("0m").is_err());
        assert!(parse_ttl("10w").is_err());
        assert!(parse_ttl("m").is_err());
    }

    #[test]
    fn resolve_secret_persists_generated_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("secret");
        let first = resolve_secret(&["AGORA_TEST_UNSET_SECRET_VAR"], &path);
        assert_eq!(first.len(), 64);
        let second = resolve_secret(&["AGORA_TEST_UNSET_SECRET_VAR"], &path);
        assert_eq!(first, second);
    }
}

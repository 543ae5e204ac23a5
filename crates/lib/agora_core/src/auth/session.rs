//! Session service: register, login, refresh rotation, logout, password
//! reset and root bootstrap.
//!
//! This is the only writer of refresh records and reset codes. Every token
//! pair it hands out is paired with a fresh ledger record; access tokens are
//! stateless and expire on their own.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::{Rng, rng};
use tracing::{debug, error, info, warn};

use super::accounts::AccountDirectory;
use super::dispatch::CodeDispatcher;
use super::jwt::{TokenIssuer, hash_for_storage};
use super::ledger::RefreshTokenLedger;
use super::password::PasswordHasher;
use super::reset_codes::ResetCodeStore;
use super::{AuthError, AuthResult, normalize_email};
use crate::models::auth::{
    Account, AccountUpdate, AccountView, RefreshRecord, Requester, Role, Session, TokenPair,
};

/// Reset code lifetime: 15 minutes.
pub const RESET_CODE_TTL_MINS: i64 = 15;

/// Display name given to the bootstrapped root account.
const ROOT_DISPLAY_NAME: &str = "Root";

/// Collaborators the session service persists through.
#[derive(Clone)]
pub struct SessionStores {
    pub accounts: Arc<dyn AccountDirectory>,
    pub ledger: Arc<dyn RefreshTokenLedger>,
    pub reset_codes: Arc<dyn ResetCodeStore>,
    pub dispatcher: Arc<dyn CodeDispatcher>,
}

/// Input to [`SessionService::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub secondary_id: Option<String>,
}

/// Counts from one purge run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub reset_codes: u64,
    pub refresh_tokens: u64,
}

pub struct SessionService {
    stores: SessionStores,
    tokens: TokenIssuer,
    hasher: PasswordHasher,
    root_email: String,
    reset_code_ttl: Duration,
    /// Verified against when the account does not exist, so an unknown
    /// email costs the same bcrypt work as a wrong password.
    dummy_hash: String,
}

impl SessionService {
    pub fn new(
        stores: SessionStores,
        tokens: TokenIssuer,
        hasher: PasswordHasher,
        root_email: &str,
    ) -> AuthResult<Self> {
        let root_email = normalize_email(root_email);
        if root_email.is_empty() {
            return Err(AuthError::Config("root email must not be empty".into()));
        }
        let dummy_hash = hasher.hash("agora-timing-equalizer")?;
        Ok(Self {
            stores,
            tokens,
            hasher,
            root_email,
            reset_code_ttl: Duration::minutes(RESET_CODE_TTL_MINS),
            dummy_hash,
        })
    }

    /// Override the reset code lifetime.
    pub fn with_reset_code_ttl(mut self, ttl: Duration) -> Self {
        self.reset_code_ttl = ttl;
        self
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn root_email(&self) -> &str {
        &self.root_email
    }

    // -----------------------------------------------------------------------
    // Password hashing off the async executor
    // -----------------------------------------------------------------------

    async fn hash_password(&self, password: &str) -> AuthResult<String> {
        let hasher = self.hasher;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hash task: {e}")))?
    }

    async fn verify_password(&self, password: &str, hash: &str) -> AuthResult<bool> {
        let hasher = self.hasher;
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("verify task: {e}")))
    }

    // -----------------------------------------------------------------------
    // Token pairs
    // -----------------------------------------------------------------------

    /// Mint an access token and a refresh token, recording the latter.
    pub async fn issue_tokens(&self, account: &Account) -> AuthResult<TokenPair> {
        let access_token = self.tokens.issue_access(account)?;
        let refresh = self.tokens.issue_refresh(account)?;
        let record = RefreshRecord {
            token_id: refresh.token_id,
            email: account.email.clone(),
            token_hash: hash_for_storage(&refresh.token),
            revoked: false,
            created_at: Utc::now(),
            expires_at: refresh.expires_at,
        };
        if let Err(e) = self.stores.ledger.save(record).await {
            if matches!(e, AuthError::DuplicateTokenId) {
                error!(email = %account.email, "refresh token id collision");
            }
            return Err(e);
        }
        Ok(TokenPair {
            access_token,
            refresh_token: refresh.token,
        })
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Create a `user` account and sign it in.
    pub async fn register(&self, registration: Registration) -> AuthResult<Session> {
        let email = normalize_email(&registration.email);
        let name = registration.name.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::Validation("a valid email is required".into()));
        }
        if name.is_empty() {
            return Err(AuthError::Validation("name is required".into()));
        }
        if registration.password.is_empty() {
            return Err(AuthError::Validation("password is required".into()));
        }
        if email == self.root_email {
            warn!(email = %email, "registration attempted with reserved root identity");
            return Err(AuthError::ReservedIdentity);
        }

        if self.stores.accounts.get_by_email(&email).await?.is_some() {
            return Err(AuthError::AlreadyExists);
        }

        let secondary_id = registration
            .secondary_id
            .map(|id| id.trim().to_uppercase())
            .filter(|id| !id.is_empty());
        if let Some(id) = secondary_id.as_deref()
            && self.stores.accounts.get_by_secondary_id(id).await?.is_some()
        {
            return Err(AuthError::AlreadyExists);
        }

        let password_hash = self.hash_password(&registration.password).await?;
        let account = Account {
            email,
            name,
            password_hash,
            role: Role::User,
            secondary_id,
            created_at: Utc::now(),
        };
        self.stores.accounts.create(account.clone()).await?;
        info!(email = %account.email, "account registered");

        let tokens = self.issue_tokens(&account).await?;
        Ok(Session {
            tokens,
            account: account.view(),
        })
    }

    /// Authenticate with email and password.
    ///
    /// Unknown email and wrong password fail identically, including the
    /// bcrypt work done.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<Session> {
        let email = normalize_email(email);
        let Some(account) = self.stores.accounts.get_by_email(&email).await? else {
            self.verify_password(password, &self.dummy_hash).await?;
            return Err(AuthError::InvalidCredentials);
        };

        if !self.verify_password(password, &account.password_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let tokens = self.issue_tokens(&account).await?;
        debug!(email = %account.email, "login succeeded");
        Ok(Session {
            tokens,
            account: account.view(),
        })
    }

    /// Exchange a refresh token for a new pair (single-use rotation).
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let claims = self
            .tokens
            .verify_refresh(refresh_token)
            .ok_or(AuthError::InvalidRefreshToken)?;

        let record = self
            .stores
            .ledger
            .get(&claims.jti)
            .await?
            .filter(|r| !r.revoked)
            .ok_or(AuthError::InvalidRefreshToken)?;

        if record.token_hash != hash_for_storage(refresh_token) {
            warn!(email = %claims.sub, "refresh token hash mismatch");
            return Err(AuthError::InvalidRefreshToken);
        }

        let account = self
            .stores
            .accounts
            .get_by_email(&claims.sub)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        // Consume before minting the replacement. Losing this transition
        // means a concurrent refresh already used the token.
        if !self.stores.ledger.revoke(&claims.jti).await? {
            warn!(email = %claims.sub, "refresh token consumed concurrently");
            return Err(AuthError::InvalidRefreshToken);
        }

        self.issue_tokens(&account).await
    }

    /// Revoke the session behind one refresh token. Invalid or unknown
    /// tokens are ignored.
    pub async fn logout(&self, refresh_token: &str) -> AuthResult<()> {
        let Some(claims) = self.tokens.verify_refresh(refresh_token) else {
            return Ok(());
        };
        if let Some(record) = self.stores.ledger.get(&claims.jti).await?
            && record.token_hash == hash_for_storage(refresh_token)
        {
            self.stores.ledger.revoke(&claims.jti).await?;
        }
        Ok(())
    }

    /// Revoke every session of the requester.
    pub async fn logout_all(&self, requester: &Requester) -> AuthResult<u64> {
        let revoked = self.stores.ledger.revoke_all(&requester.email).await?;
        info!(email = %requester.email, revoked, "all sessions revoked");
        Ok(revoked)
    }

    /// Public view of the account at `email`.
    pub async fn me(&self, email: &str) -> AuthResult<AccountView> {
        self.stores
            .accounts
            .get_by_email(&normalize_email(email))
            .await?
            .map(|a| a.view())
            .ok_or(AuthError::NotFound)
    }

    /// Authenticated password change: root may change anyone's password,
    /// everyone else only their own. Revokes every session of the account.
    pub async fn reset_password(
        &self,
        email: &str,
        new_password: &str,
        requester: &Requester,
    ) -> AuthResult<()> {
        let email = normalize_email(email);
        if requester.role != Role::Root && requester.email != email {
            return Err(AuthError::Forbidden);
        }

        if self.stores.accounts.get_by_email(&email).await?.is_none() {
            return Err(AuthError::NotFound);
        }

        let password_hash = self.hash_password(new_password).await?;
        self.stores
            .accounts
            .update(&email, AccountUpdate::password(password_hash))
            .await?;
        let revoked = self.stores.ledger.revoke_all(&email).await?;
        info!(email = %email, by = %requester.email, revoked, "password reset");
        Ok(())
    }

    /// Forgot-password entry point. Succeeds identically whether or not the
    /// account exists.
    pub async fn request_password_reset(&self, email: &str) -> AuthResult<()> {
        let email = normalize_email(email);
        if self.stores.accounts.get_by_email(&email).await?.is_none() {
            debug!("password reset requested for unknown account");
            return Ok(());
        }

        let code = rng().random_range(100_000..=999_999).to_string();
        let expires_at = (Utc::now() + self.reset_code_ttl).timestamp_millis();
        self.stores
            .reset_codes
            .save(&email, &code, expires_at)
            .await?;

        if let Err(e) = self.stores.dispatcher.dispatch(&email, &code).await {
            warn!(email = %email, error = %e, "reset code dispatch failed, code kept");
        }
        info!(email = %email, "password reset code issued");
        Ok(())
    }

    /// Check a reset code without consuming it. An expired code is deleted.
    pub async fn verify_reset_code(&self, email: &str, code: &str) -> AuthResult<()> {
        let email = normalize_email(email);
        let record = self
            .stores
            .reset_codes
            .get(&email)
            .await?
            .ok_or(AuthError::NotFound)?;

        if record.used {
            return Err(AuthError::AlreadyUsed);
        }

        let now_ms = Utc::now().timestamp_millis();
        if now_ms > record.expires_at {
            self.stores
                .reset_codes
                .delete_if_expired(&email, now_ms)
                .await?;
            return Err(AuthError::Expired);
        }

        // Plain comparison: codes are single-use and short-lived, brute force
        // has to be throttled in front of this endpoint.
        if record.code != code {
            return Err(AuthError::InvalidCode);
        }

        Ok(())
    }

    /// Complete a forgot-password flow: re-check the code, consume it, set
    /// the new password and revoke every session.
    pub async fn confirm_password_reset(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let email = normalize_email(email);
        self.verify_reset_code(&email, code).await?;

        if self.stores.accounts.get_by_email(&email).await?.is_none() {
            return Err(AuthError::NotFound);
        }

        let password_hash = self.hash_password(new_password).await?;

        // Claim the code before writing the password so two concurrent
        // confirmations cannot both apply. The claim only matches the code
        // verified above; a newer code saved meanwhile is left untouched.
        if !self.stores.reset_codes.mark_used(&email, code).await? {
            let current = self.stores.reset_codes.get(&email).await?;
            return Err(match current {
                Some(record) if record.code == code && record.used => AuthError::AlreadyUsed,
                _ => AuthError::InvalidCode,
            });
        }

        self.stores
            .accounts
            .update(&email, AccountUpdate::password(password_hash))
            .await?;
        let revoked = self.stores.ledger.revoke_all(&email).await?;
        info!(email = %email, revoked, "password reset confirmed");
        Ok(())
    }

    /// Create the root account if a password is configured and no account
    /// exists at `root_email`. Returns whether an account was created.
    pub async fn ensure_root_bootstrap(
        &self,
        root_email: &str,
        root_password: Option<&str>,
    ) -> AuthResult<bool> {
        let Some(password) = root_password.filter(|p| !p.is_empty()) else {
            debug!("root bootstrap disabled");
            return Ok(false);
        };

        let email = normalize_email(root_email);
        if self.stores.accounts.get_by_email(&email).await?.is_some() {
            debug!(email = %email, "root account already present");
            return Ok(false);
        }

        let password_hash = self.hash_password(password).await?;
        let account = Account {
            email,
            name: ROOT_DISPLAY_NAME.to_string(),
            password_hash,
            role: Role::Root,
            secondary_id: None,
            created_at: Utc::now(),
        };
        match self.stores.accounts.create(account).await {
            Ok(()) => {
                info!(email = root_email, "root account bootstrapped");
                Ok(true)
            }
            // Another process won the race.
            Err(AuthError::AlreadyExists) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete expired reset codes and refresh records.
    pub async fn purge_expired(&self) -> AuthResult<PurgeReport> {
        let now = Utc::now();
        let reset_codes = self
            .stores
            .reset_codes
            .purge_expired(now.timestamp_millis())
            .await?;
        let refresh_tokens = self.stores.ledger.purge_expired(now).await?;
        Ok(PurgeReport {
            reset_codes,
            refresh_tokens,
        })
    }
}

//! API server configuration.

use std::sync::Arc;

use agora_core::auth::dispatch::{
    CodeDispatcher, LogDispatcher, NoopDispatcher, WebhookDispatcher,
};
use agora_core::auth::jwt::{
    DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS, TokenIssuer, parse_ttl,
    resolve_access_secret, resolve_refresh_secret,
};
use agora_core::auth::password::{BCRYPT_COST, PasswordHasher};
use agora_core::auth::session::{SessionService, SessionStores};
use agora_core::auth::{AuthError, AuthResult};
use chrono::Duration;

/// Default identity reserved for the bootstrapped root account.
pub const DEFAULT_ROOT_EMAIL: &str = "root@agora.local";

/// Where password reset codes are sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResetDispatch {
    /// Codes are stored but not delivered.
    None,
    /// Development only: codes are written to the log.
    Log,
    /// Codes are POSTed to an external mailer.
    Webhook(String),
}

/// Configuration for the API server.
#[derive(Clone)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Access-token signing secret.
    pub access_secret: String,
    /// Refresh-token signing secret, distinct from `access_secret`.
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Reserved root identity; public registration rejects it.
    pub root_email: String,
    /// Root bootstrap password. Bootstrap is disabled when unset.
    pub root_password: Option<String>,
    pub reset_dispatch: ResetDispatch,
    /// bcrypt cost factor.
    pub bcrypt_cost: u32,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("bind_addr", &self.bind_addr)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("root_email", &self.root_email)
            .field("root_bootstrap", &self.root_password.is_some())
            .field("reset_dispatch", &self.reset_dispatch)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish_non_exhaustive()
    }
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                 | Default                                |
    /// |--------------------------|----------------------------------------|
    /// | `BIND_ADDR`              | `127.0.0.1:3100`                       |
    /// | `DATABASE_URL`           | `postgres://localhost:5432/agora`      |
    /// | `JWT_SECRET`             | generated & persisted to file          |
    /// | `REFRESH_JWT_SECRET`     | generated & persisted to file          |
    /// | `ACCESS_TOKEN_TTL`       | `15m`                                  |
    /// | `REFRESH_TOKEN_TTL`      | `30d`                                  |
    /// | `ROOT_EMAIL`             | `root@agora.local`                     |
    /// | `ROOT_PASSWORD`          | unset (bootstrap disabled)             |
    /// | `RESET_CODE_WEBHOOK_URL` | unset                                  |
    /// | `RESET_CODE_DISPATCH`    | `webhook` if a URL is set, else `none` |
    pub fn from_env() -> AuthResult<Self> {
        let access_ttl = match env_non_empty("ACCESS_TOKEN_TTL") {
            Some(v) => parse_ttl(&v)?,
            None => Duration::seconds(DEFAULT_ACCESS_TTL_SECS),
        };
        let refresh_ttl = match env_non_empty("REFRESH_TOKEN_TTL") {
            Some(v) => parse_ttl(&v)?,
            None => Duration::seconds(DEFAULT_REFRESH_TTL_SECS),
        };
        let reset_dispatch = parse_dispatch(
            env_non_empty("RESET_CODE_DISPATCH").as_deref(),
            env_non_empty("RESET_CODE_WEBHOOK_URL"),
        )?;

        Ok(Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3100".into()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/agora".into()),
            access_secret: resolve_access_secret(),
            refresh_secret: resolve_refresh_secret(),
            access_ttl,
            refresh_ttl,
            root_email: env_non_empty("ROOT_EMAIL").unwrap_or_else(|| DEFAULT_ROOT_EMAIL.into()),
            root_password: env_non_empty("ROOT_PASSWORD"),
            reset_dispatch,
            bcrypt_cost: BCRYPT_COST,
        })
    }

    /// Token issuer for the configured secrets and TTLs.
    pub fn token_issuer(&self) -> AuthResult<TokenIssuer> {
        TokenIssuer::new(
            self.access_secret.as_bytes(),
            self.refresh_secret.as_bytes(),
            self.access_ttl,
            self.refresh_ttl,
        )
    }

    /// Dispatcher matching `reset_dispatch`.
    pub fn dispatcher(&self) -> AuthResult<Arc<dyn CodeDispatcher>> {
        Ok(match &self.reset_dispatch {
            ResetDispatch::None => Arc::new(NoopDispatcher),
            ResetDispatch::Log => Arc::new(LogDispatcher),
            ResetDispatch::Webhook(url) => Arc::new(
                WebhookDispatcher::new(url.clone())
                    .map_err(|e| AuthError::Config(format!("reset code webhook: {e}")))?,
            ),
        })
    }

    /// Assemble the session service over `stores`.
    pub fn session_service(&self, stores: SessionStores) -> AuthResult<SessionService> {
        SessionService::new(
            stores,
            self.token_issuer()?,
            PasswordHasher::new(self.bcrypt_cost),
            &self.root_email,
        )
    }
}

fn env_non_empty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_dispatch(mode: Option<&str>, url: Option<String>) -> AuthResult<ResetDispatch> {
    match (mode, url) {
        (Some("none"), _) => Ok(ResetDispatch::None),
        (Some("log"), _) => Ok(ResetDispatch::Log),
        (Some("webhook") | None, Some(url)) => Ok(ResetDispatch::Webhook(url)),
        (Some("webhook"), None) => Err(AuthError::Config(
            "RESET_CODE_DISPATCH=webhook requires RESET_CODE_WEBHOOK_URL".into(),
        )),
        (None, None) => Ok(ResetDispatch::None),
        (Some(other), _) => Err(AuthError::Config(format!(
            "unknown RESET_CODE_DISPATCH '{other}'"
        ))),
    }
}

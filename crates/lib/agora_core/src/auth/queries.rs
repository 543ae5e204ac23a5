//! PostgreSQL-backed account directory, refresh ledger and reset code store.
//!
//! Each mutation is a single statement, so per-record atomicity comes from
//! PostgreSQL row locking; conditional transitions use `WHERE revoked = false`
//! / `WHERE used = false` and report the affected row count.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::accounts::AccountDirectory;
use super::ledger::RefreshTokenLedger;
use super::reset_codes::ResetCodeStore;
use super::{AuthError, AuthResult};
use crate::models::auth::{Account, AccountUpdate, RefreshRecord, ResetRecord, Role};

type AccountRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    DateTime<Utc>,
);

fn account_from_row(
    (email, name, password_hash, role, secondary_id, created_at): AccountRow,
) -> AuthResult<Account> {
    let role = role.parse::<Role>().map_err(AuthError::Internal)?;
    Ok(Account {
        email,
        name,
        password_hash,
        role,
        secondary_id,
        created_at,
    })
}

type RefreshRow = (String, String, String, bool, DateTime<Utc>, DateTime<Utc>);

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error().is_some_and(|db| db.is_unique_violation())
}

/// Accounts table.
#[derive(Debug, Clone)]
pub struct PgAccountDirectory {
    pool: PgPool,
}

impl PgAccountDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountDirectory for PgAccountDirectory {
    async fn get_by_email(&self, email: &str) -> AuthResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT email, name, password_hash, role, secondary_id, created_at \
             FROM accounts WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(account_from_row).transpose()
    }

    async fn get_by_secondary_id(&self, secondary_id: &str) -> AuthResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT email, name, password_hash, role, secondary_id, created_at \
             FROM accounts WHERE secondary_id = $1",
        )
        .bind(secondary_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(account_from_row).transpose()
    }

    async fn create(&self, account: Account) -> AuthResult<()> {
        sqlx::query(
            "INSERT INTO accounts (email, name, password_hash, role, secondary_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&account.email)
        .bind(&account.name)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(account.secondary_id.as_deref())
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AuthError::AlreadyExists
            } else {
                AuthError::Store(e)
            }
        })?;
        Ok(())
    }

    async fn update(&self, email: &str, update: AccountUpdate) -> AuthResult<()> {
        let result = sqlx::query(
            "UPDATE accounts \
             SET password_hash = COALESCE($2, password_hash) \
             WHERE email = $1",
        )
        .bind(email)
        .bind(update.password_hash)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound);
        }
        Ok(())
    }
}

/// `refresh_tokens` table.
#[derive(Debug, Clone)]
pub struct PgRefreshLedger {
    pool: PgPool,
}

impl PgRefreshLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenLedger for PgRefreshLedger {
    async fn save(&self, record: RefreshRecord) -> AuthResult<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens (token_id, email, token_hash, revoked, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&record.token_id)
        .bind(&record.email)
        .bind(&record.token_hash)
        .bind(record.revoked)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AuthError::DuplicateTokenId
            } else {
                AuthError::Store(e)
            }
        })?;
        Ok(())
    }

    async fn get(&self, token_id: &str) -> AuthResult<Option<RefreshRecord>> {
        let row = sqlx::query_as::<_, RefreshRow>(
            "SELECT token_id, email, token_hash, revoked, created_at, expires_at \
             FROM refresh_tokens WHERE token_id = $1",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(
            |(token_id, email, token_hash, revoked, created_at, expires_at)| RefreshRecord {
                token_id,
                email,
                token_hash,
                revoked,
                created_at,
                expires_at,
            },
        ))
    }

    async fn revoke(&self, token_id: &str) -> AuthResult<bool> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = true \
             WHERE token_id = $1 AND revoked = false",
        )
        .bind(token_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all(&self, email: &str) -> AuthResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = true \
             WHERE email = $1 AND revoked = false",
        )
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// `password_reset_codes` table.
#[derive(Debug, Clone)]
pub struct PgResetCodeStore {
    pool: PgPool,
}

impl PgResetCodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResetCodeStore for PgResetCodeStore {
    async fn save(&self, email: &str, code: &str, expires_at: i64) -> AuthResult<()> {
        sqlx::query(
            "INSERT INTO password_reset_codes (email, code, expires_at, used, created_at) \
             VALUES ($1, $2, $3, false, now()) \
             ON CONFLICT (email) DO UPDATE \
             SET code = EXCLUDED.code, expires_at = EXCLUDED.expires_at, \
                 used = false, used_at = NULL, created_at = now()",
        )
        .bind(email)
        .bind(code)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, email: &str) -> AuthResult<Option<ResetRecord>> {
        let row = sqlx::query_as::<_, (String, String, i64, bool, DateTime<Utc>)>(
            "SELECT email, code, expires_at, used, created_at \
             FROM password_reset_codes WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(email, code, expires_at, used, created_at)| ResetRecord {
            email,
            code,
            expires_at,
            used,
            created_at,
        }))
    }

    async fn mark_used(&self, email: &str, code: &str) -> AuthResult<bool> {
        let result = sqlx::query(
            "UPDATE password_reset_codes SET used = true, used_at = now() \
             WHERE email = $1 AND code = $2 AND used = false",
        )
        .bind(email)
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_if_expired(&self, email: &str, now_ms: i64) -> AuthResult<bool> {
        let result =
            sqlx::query("DELETE FROM password_reset_codes WHERE email = $1 AND expires_at < $2")
                .bind(email)
                .bind(now_ms)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired(&self, now_ms: i64) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM password_reset_codes WHERE expires_at < $1")
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

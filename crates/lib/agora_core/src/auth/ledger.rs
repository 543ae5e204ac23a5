//! Refresh-token ledger: server-side record of every issued refresh token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{AuthError, AuthResult};
use crate::models::auth::RefreshRecord;

/// Persistent record of issued refresh tokens and their revocation state.
///
/// Every method is atomic per record. `revoke` is a conditional
/// `revoked: false → true` transition and reports whether this call made it,
/// which is what lets rotation consume a token exactly once.
#[async_trait]
pub trait RefreshTokenLedger: Send + Sync {
    /// Insert a new record. Fails with `DuplicateTokenId` if the id exists.
    async fn save(&self, record: RefreshRecord) -> AuthResult<()>;

    async fn get(&self, token_id: &str) -> AuthResult<Option<RefreshRecord>>;

    /// Mark a record revoked. Returns `true` only for the call that flipped
    /// it; revoking an already revoked or unknown id returns `false`.
    async fn revoke(&self, token_id: &str) -> AuthResult<bool>;

    /// Revoke every live record of `email`, returning how many were revoked.
    async fn revoke_all(&self, email: &str) -> AuthResult<u64>;

    /// Delete records whose refresh token has expired.
    async fn purge_expired(&self, now: DateTime<Utc>) -> AuthResult<u64>;
}

/// In-memory ledger.
#[derive(Debug, Default)]
pub struct MemoryRefreshLedger {
    records: DashMap<String, RefreshRecord>,
}

impl MemoryRefreshLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RefreshTokenLedger for MemoryRefreshLedger {
    async fn save(&self, record: RefreshRecord) -> AuthResult<()> {
        match self.records.entry(record.token_id.clone()) {
            Entry::Occupied(_) => Err(AuthError::DuplicateTokenId),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, token_id: &str) -> AuthResult<Option<RefreshRecord>> {
        Ok(self.records.get(token_id).map(|r| r.value().clone()))
    }

    async fn revoke(&self, token_id: &str) -> AuthResult<bool> {
        Ok(match self.records.get_mut(token_id) {
            Some(mut record) if !record.revoked => {
                record.revoked = true;
                true
            }
            _ => false,
        })
    }

    async fn revoke_all(&self, email: &str) -> AuthResult<u64> {
        let mut revoked = 0;
        for mut record in self.records.iter_mut() {
            if record.email == email && !record.revoked {
                record.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.expires_at < now)
            .map(|r| r.key().clone())
            .collect();
        let mut removed = 0;
        for id in expired {
            if self
                .records
                .remove_if(&id, |_, r| r.expires_at < now)
                .is_some()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

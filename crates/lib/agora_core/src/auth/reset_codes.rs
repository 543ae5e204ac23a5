//! Password reset codes: at most one outstanding code per account.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::AuthResult;
use crate::models::auth::ResetRecord;

/// Persistent one-time reset codes keyed by normalized email.
#[async_trait]
pub trait ResetCodeStore: Send + Sync {
    /// Upsert the record for `email` with `used = false`, replacing any
    /// previous code.
    async fn save(&self, email: &str, code: &str, expires_at: i64) -> AuthResult<()>;

    async fn get(&self, email: &str) -> AuthResult<Option<ResetRecord>>;

    /// Mark `code` used. Returns `true` only for the call that flipped it,
    /// and only while `code` is still the stored code for `email`.
    async fn mark_used(&self, email: &str, code: &str) -> AuthResult<bool>;

    /// Delete the record for `email` if it has expired by `now_ms`. A code
    /// saved since the caller looked is left alone.
    async fn delete_if_expired(&self, email: &str, now_ms: i64) -> AuthResult<bool>;

    /// Delete every record with `expires_at < now_ms`, returning the count.
    async fn purge_expired(&self, now_ms: i64) -> AuthResult<u64>;
}

/// In-memory reset code store.
#[derive(Debug, Default)]
pub struct MemoryResetCodeStore {
    codes: DashMap<String, ResetRecord>,
}

impl MemoryResetCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[async_trait]
impl ResetCodeStore for MemoryResetCodeStore {
    async fn save(&self, email: &str, code: &str, expires_at: i64) -> AuthResult<()> {
        self.codes.insert(
            email.to_string(),
            ResetRecord {
                email: email.to_string(),
                code: code.to_string(),
                expires_at,
                used: false,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, email: &str) -> AuthResult<Option<ResetRecord>> {
        Ok(self.codes.get(email).map(|r| r.value().clone()))
    }

    async fn mark_used(&self, email: &str, code: &str) -> AuthResult<bool> {
        Ok(match self.codes.get_mut(email) {
            Some(mut record) if !record.used && record.code == code => {
                record.used = true;
                true
            }
            _ => false,
        })
    }

    async fn delete_if_expired(&self, email: &str, now_ms: i64) -> AuthResult<bool> {
        Ok(self
            .codes
            .remove_if(email, |_, r| r.expires_at < now_ms)
            .is_some())
    }

    async fn purge_expired(&self, now_ms: i64) -> AuthResult<u64> {
        let expired: Vec<String> = self
            .codes
            .iter()
            .filter(|r| r.expires_at < now_ms)
            .map(|r| r.key().clone())
            .collect();
        let mut removed = 0;
        for email in expired {
            if self
                .codes
                .remove_if(&email, |_, r| r.expires_at < now_ms)
                .is_some()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_overwrites_and_resets_used() {
        let store = MemoryResetCodeStore::new();
        store.save("a@x.com", "111111", 1_000).await.unwrap();
        assert!(store.mark_used("a@x.com", "111111").await.unwrap());

        store.save("a@x.com", "222222", 2_000).await.unwrap();
        let record = store.get("a@x.com").await.unwrap().unwrap();
        assert_eq!(record.code, "222222");
        assert_eq!(record.expires_at, 2_000);
        assert!(!record.used);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn mark_used_transitions_once() {
        let store = MemoryResetCodeStore::new();
        store.save("a@x.com", "111111", 1_000).await.unwrap();
        assert!(store.mark_used("a@x.com", "111111").await.unwrap());
        assert!(!store.mark_used("a@x.com", "111111").await.unwrap());
        assert!(!store.mark_used("ghost@x.com", "111111").await.unwrap());
    }

    #[tokio::test]
    async fn mark_used_ignores_superseded_code() {
        let store = MemoryResetCodeStore::new();
        store.save("a@x.com", "111111", 1_000).await.unwrap();
        store.save("a@x.com", "222222", 1_000).await.unwrap();

        assert!(!store.mark_used("a@x.com", "111111").await.unwrap());
        assert!(!store.get("a@x.com").await.unwrap().unwrap().used);
        assert!(store.mark_used("a@x.com", "222222").await.unwrap());
    }

    #[tokio::test]
    async fn purge_expired_counts_deleted() {
        let store = MemoryResetCodeStore::new();
        store.save("old@x.com", "111111", 100).await.unwrap();
        store.save("older@x.com", "222222", 50).await.unwrap();
        store.save("new@x.com", "333333", 10_000).await.unwrap();

        assert_eq!(store.purge_expired(1_000).await.unwrap(), 2);
        assert!(store.get("old@x.com").await.unwrap().is_none());
        assert!(store.get("new@x.com").await.unwrap().is_some());
        assert_eq!(store.purge_expired(1_000).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_if_expired_keeps_live_codes() {
        let store = MemoryResetCodeStore::new();
        store.save("a@x.com", "111111", 1_000).await.unwrap();

        assert!(!store.delete_if_expired("a@x.com", 500).await.unwrap());
        assert_eq!(store.len(), 1);

        assert!(store.delete_if_expired("a@x.com", 2_000).await.unwrap());
        assert!(!store.delete_if_expired("a@x.com", 2_000).await.unwrap());
        assert!(store.is_empty());
    }
}

//! Account directory: lookup, creation and allow-listed updates of accounts.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{AuthError, AuthResult};
use crate::models::auth::{Account, AccountUpdate};

/// Storage of account records keyed by normalized email.
///
/// Implementations must enforce email uniqueness themselves: `create` on an
/// existing email fails with [`AuthError::AlreadyExists`], as does a
/// duplicate secondary identifier.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn get_by_email(&self, email: &str) -> AuthResult<Option<Account>>;

    async fn get_by_secondary_id(&self, secondary_id: &str) -> AuthResult<Option<Account>>;

    async fn create(&self, account: Account) -> AuthResult<()>;

    /// Apply `update` to the account at `email`. Fails with `NotFound` if
    /// there is no such account.
    async fn update(&self, email: &str, update: AccountUpdate) -> AuthResult<()>;
}

/// In-memory account directory.
#[derive(Debug, Default)]
pub struct MemoryAccountDirectory {
    accounts: DashMap<String, Account>,
}

impl MemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl AccountDirectory for MemoryAccountDirectory {
    async fn get_by_email(&self, email: &str) -> AuthResult<Option<Account>> {
        Ok(self.accounts.get(email).map(|a| a.value().clone()))
    }

    async fn get_by_secondary_id(&self, secondary_id: &str) -> AuthResult<Option<Account>> {
        Ok(self
            .accounts
            .iter()
            .find(|a| a.secondary_id.as_deref() == Some(secondary_id))
            .map(|a| a.value().clone()))
    }

    async fn create(&self, account: Account) -> AuthResult<()> {
        if let Some(sid) = account.secondary_id.as_deref()
            && self.get_by_secondary_id(sid).await?.is_some()
        {
            return Err(AuthError::AlreadyExists);
        }
        match self.accounts.entry(account.email.clone()) {
            Entry::Occupied(_) => Err(AuthError::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(account);
                Ok(())
            }
        }
    }

    async fn update(&self, email: &str, update: AccountUpdate) -> AuthResult<()> {
        let mut account = self.accounts.get_mut(email).ok_or(AuthError::NotFound)?;
        if let Some(hash) = update.password_hash {
            account.password_hash = hash;
        }
        Ok(())
    }
}

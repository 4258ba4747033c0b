//! Persistence boundary for the journal and account ledger.
//!
//! The engine needs two guarantees from durable storage: an atomic append
//! of a journal entry with all of its legs, and an atomic compare-and-set
//! over a batch of account rows (all rows or none, each row guarded by its
//! expected version). On startup it reads both back to rebuild its state.
//! Schema is the backend's concern.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use hearth_shared::types::{AccountId, Money};
use thiserror::Error;

use super::account::Account;
use super::journal::JournalEntry;

/// Errors reported by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed to execute the operation.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A record with the same key already exists.
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// The referenced row is missing.
    #[error("Missing record: {0}")]
    Missing(String),
}

/// New balance for one account, guarded by the version it replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceUpdate {
    /// The account ID.
    pub account_id: AccountId,
    /// Version the row must still have.
    pub expected_version: u64,
    /// Version written on success.
    pub new_version: u64,
    /// Balance written on success.
    pub balance: Money,
}

/// Result of a batch compare-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Every row matched and was updated.
    Applied,
    /// A row had moved on; nothing was written.
    Conflict {
        /// First account whose version did not match.
        account_id: AccountId,
    },
}

/// Durable storage used by the posting coordinator.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persists a freshly opened account (version 0, zero balance).
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError>;

    /// Atomically appends a journal entry and its legs.
    async fn append(&self, entry: &JournalEntry) -> Result<(), StoreError>;

    /// Atomically updates a batch of account rows.
    async fn compare_and_set(&self, updates: &[BalanceUpdate]) -> Result<CasOutcome, StoreError>;

    /// Every persisted account with its stored balance and version.
    async fn load_accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// Every persisted journal entry with its legs, in offset order.
    async fn load_entries(&self) -> Result<Vec<JournalEntry>, StoreError>;
}

/// In-process store, used for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: Mutex<HashMap<AccountId, Account>>,
    entries: Mutex<Vec<JournalEntry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted journal entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Persisted (version, balance) of an account.
    #[must_use]
    pub fn account_row(&self, account_id: AccountId) -> Option<(u64, Money)> {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&account_id)
            .map(|account| (account.version, account.balance))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        if accounts.contains_key(&account.id) {
            return Err(StoreError::Duplicate(format!("account {}", account.id)));
        }
        accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn append(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.iter().any(|e| e.offset == entry.offset) {
            return Err(StoreError::Duplicate(format!("journal offset {}", entry.offset)));
        }
        entries.push(entry.clone());
        Ok(())
    }

    async fn compare_and_set(&self, updates: &[BalanceUpdate]) -> Result<CasOutcome, StoreError> {
        let mut accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);

        for update in updates {
            match accounts.get(&update.account_id) {
                Some(account) if account.version == update.expected_version => {}
                Some(_) => {
                    return Ok(CasOutcome::Conflict {
                        account_id: update.account_id,
                    });
                }
                None => return Err(StoreError::Missing(format!("account {}", update.account_id))),
            }
        }

        for update in updates {
            if let Some(account) = accounts.get_mut(&update.account_id) {
                account.version = update.new_version;
                account.balance = update.balance;
            }
        }
        Ok(CasOutcome::Applied)
    }

    async fn load_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        let mut loaded: Vec<Account> = accounts.values().cloned().collect();
        loaded.sort_by_key(|account| (account.opened_at, account.id));
        Ok(loaded)
    }

    async fn load_entries(&self) -> Result<Vec<JournalEntry>, StoreError> {
        let mut loaded = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        loaded.sort_by_key(|entry| entry.offset);
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::account::AccountKind;
    use chrono::Utc;
    use hearth_shared::types::{Currency, GroupId, UserId};
    use rust_decimal_macros::dec;

    fn account() -> Account {
        Account {
            id: AccountId::new(),
            group_id: GroupId::new(),
            owner: UserId::new(),
            title: "Savings".to_string(),
            kind: AccountKind::Savings,
            overdraft_allowed: false,
            balance: Money::zero(Currency::Usd),
            version: 0,
            opened_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_loaded_accounts_carry_applied_updates() {
        let store = MemoryStore::new();
        let saved = account();
        store.insert_account(&saved).await.unwrap();

        let outcome = store
            .compare_and_set(&[BalanceUpdate {
                account_id: saved.id,
                expected_version: 0,
                new_version: 1,
                balance: Money::new(dec!(250), Currency::Usd),
            }])
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Applied);

        let loaded = store.load_accounts().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "Savings");
        assert_eq!(loaded[0].version, 1);
        assert_eq!(loaded[0].balance.amount, dec!(250));
    }

    #[tokio::test]
    async fn test_conflict_leaves_rows_untouched() {
        let store = MemoryStore::new();
        let (a, b) = (account(), account());
        store.insert_account(&a).await.unwrap();
        store.insert_account(&b).await.unwrap();

        let outcome = store
            .compare_and_set(&[
                BalanceUpdate {
                    account_id: a.id,
                    expected_version: 0,
                    new_version: 1,
                    balance: Money::new(dec!(5), Currency::Usd),
                },
                BalanceUpdate {
                    account_id: b.id,
                    expected_version: 3,
                    new_version: 4,
                    balance: Money::new(dec!(5), Currency::Usd),
                },
            ])
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Conflict { account_id: b.id });
        assert_eq!(store.account_row(a.id), Some((0, Money::zero(Currency::Usd))));
    }
}

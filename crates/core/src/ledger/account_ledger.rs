//! Account ledger: committed balances, versions and per-account locks.
//!
//! Committed state is an immutable snapshot behind an `Arc`. Readers clone
//! the `Arc` and never wait on a posting; writers stage changes on a private
//! copy of the accounts they hold locks for and publish the whole batch in
//! one swap, so both legs of a transfer become visible together.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use hearth_shared::types::{AccountId, Money};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::account::Account;
use super::error::LedgerError;

/// Immutable view of every committed account.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    accounts: HashMap<AccountId, Account>,
}

impl LedgerSnapshot {
    /// Looks up an account.
    #[must_use]
    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    /// All accounts, in no particular order.
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    /// Number of accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Returns true if no account has been opened.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Outcome of one applied delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDelta {
    /// The account ID.
    pub account_id: AccountId,
    /// Balance after the delta.
    pub new_balance: Money,
    /// Version after the delta.
    pub new_version: u64,
}

/// Committed account state plus the lock table guarding mutations.
#[derive(Debug, Default)]
pub struct AccountLedger {
    committed: RwLock<Arc<LedgerSnapshot>>,
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl AccountLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a ledger from persisted accounts, balances and versions as stored.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateAccount` if an ID appears twice.
    pub fn restore(accounts: Vec<Account>) -> Result<Self, LedgerError> {
        let ledger = Self::new();
        let mut staged = ledger.stage();
        for account in accounts {
            staged.insert_account(account)?;
        }
        ledger.publish(staged);
        Ok(ledger)
    }

    /// Latest committed snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<LedgerSnapshot> {
        Arc::clone(&self.committed.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Latest committed state of one account.
    #[must_use]
    pub fn get(&self, id: AccountId) -> Option<Account> {
        self.snapshot().account(id).cloned()
    }

    /// The exclusive mutation lock of an account.
    #[must_use]
    pub fn lock_for(&self, id: AccountId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id).or_default().value())
    }

    /// Starts a private batch of changes on top of the current snapshot.
    ///
    /// Callers must hold the locks of every account they mutate.
    #[must_use]
    pub fn stage(&self) -> StagedLedger {
        StagedLedger {
            base: self.snapshot(),
            touched: BTreeMap::new(),
        }
    }

    /// Makes a staged batch visible to readers in one step.
    ///
    /// Touched accounts are merged onto the newest snapshot, so batches over
    /// disjoint accounts never overwrite each other.
    pub fn publish(&self, staged: StagedLedger) {
        if staged.touched.is_empty() {
            return;
        }
        let mut committed = self.committed.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = LedgerSnapshot::clone(&committed);
        next.accounts.extend(staged.touched);
        *committed = Arc::new(next);
    }
}

/// Uncommitted changes to a set of accounts.
///
/// Dropping a staged ledger discards it; nothing is visible until
/// [`AccountLedger::publish`].
#[derive(Debug)]
pub struct StagedLedger {
    base: Arc<LedgerSnapshot>,
    touched: BTreeMap<AccountId, Account>,
}

impl StagedLedger {
    /// Current staged state of an account.
    #[must_use]
    pub fn current(&self, id: AccountId) -> Option<&Account> {
        self.touched.get(&id).or_else(|| self.base.account(id))
    }

    /// Stages a new account.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateAccount` if the ID is already taken.
    pub fn insert_account(&mut self, account: Account) -> Result<(), LedgerError> {
        if self.current(account.id).is_some() {
            return Err(LedgerError::DuplicateAccount(account.id));
        }
        self.touched.insert(account.id, account);
        Ok(())
    }

    /// Applies a signed delta to an account.
    ///
    /// The caller presents the version it last observed. On any error the
    /// staged account is left untouched.
    ///
    /// # Errors
    ///
    /// - `AccountNotFound` if the account does not exist
    /// - `VersionConflict` if `expected_version` is stale
    /// - `CurrencyMismatch` if the delta is in another currency
    /// - `InsufficientFunds` if the balance policy would be violated
    pub fn apply_delta(
        &mut self,
        account_id: AccountId,
        delta: &Money,
        expected_version: u64,
    ) -> Result<AppliedDelta, LedgerError> {
        let current = self
            .current(account_id)
            .ok_or(LedgerError::AccountNotFound(account_id))?;

        if current.version != expected_version {
            return Err(LedgerError::VersionConflict {
                account_id,
                expected: expected_version,
                actual: current.version,
            });
        }

        let new_balance = current.balance.checked_add(delta)?;
        current.check_policy(&new_balance, delta)?;

        let mut next = current.clone();
        next.balance = new_balance;
        next.version += 1;

        let applied = AppliedDelta {
            account_id,
            new_balance,
            new_version: next.version,
        };
        self.touched.insert(account_id, next);
        Ok(applied)
    }

    /// Accounts changed by this batch.
    pub fn touched(&self) -> impl Iterator<Item = &Account> {
        self.touched.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::account::AccountKind;
    use chrono::Utc;
    use hearth_shared::types::{Currency, GroupId, UserId};
    use rust_decimal_macros::dec;

    fn seeded_ledger(kind: AccountKind, balance: Money) -> (AccountLedger, AccountId) {
        let ledger = AccountLedger::new();
        let account = Account {
            id: AccountId::new(),
            group_id: GroupId::new(),
            owner: UserId::new(),
            title: "Main Account".to_string(),
            kind,
            overdraft_allowed: false,
            balance,
            version: 0,
            opened_at: Utc::now(),
        };
        let id = account.id;
        let mut staged = ledger.stage();
        staged.insert_account(account).unwrap();
        ledger.publish(staged);
        (ledger, id)
    }

    #[test]
    fn test_apply_delta_updates_balance_and_version() {
        let (ledger, id) =
            seeded_ledger(AccountKind::Checking, Money::new(dec!(1000.00), Currency::Rub));

        let mut staged = ledger.stage();
        let applied = staged
            .apply_delta(id, &Money::new(dec!(-150.50), Currency::Rub), 0)
            .unwrap();
        assert_eq!(applied.new_balance.amount, dec!(849.50));
        assert_eq!(applied.new_version, 1);

        // Not visible until published.
        assert_eq!(ledger.get(id).unwrap().version, 0);
        ledger.publish(staged);
        let account = ledger.get(id).unwrap();
        assert_eq!(account.balance.amount, dec!(849.50));
        assert_eq!(account.version, 1);
    }

    #[test]
    fn test_stale_version_is_rejected() {
        let (ledger, id) = seeded_ledger(AccountKind::Cash, Money::new(dec!(10), Currency::Usd));
        let mut staged = ledger.stage();
        let err = staged
            .apply_delta(id, &Money::new(dec!(1), Currency::Usd), 7)
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::VersionConflict {
                expected: 7,
                actual: 0,
                ..
            }
        ));
        assert_eq!(staged.touched().count(), 0);
    }

    #[test]
    fn test_overdraft_leaves_account_unchanged() {
        let (ledger, id) =
            seeded_ledger(AccountKind::Savings, Money::new(dec!(100), Currency::Usd));
        let mut staged = ledger.stage();
        let err = staged
            .apply_delta(id, &Money::new(dec!(-100.01), Currency::Usd), 0)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(staged.current(id).unwrap().balance.amount, dec!(100));
        assert_eq!(staged.current(id).unwrap().version, 0);
    }

    #[test]
    fn test_currency_mismatch_is_rejected() {
        let (ledger, id) =
            seeded_ledger(AccountKind::Checking, Money::new(dec!(100), Currency::Usd));
        let mut staged = ledger.stage();
        let err = staged
            .apply_delta(id, &Money::new(dec!(5), Currency::Eur), 0)
            .unwrap_err();
        assert!(matches!(err, LedgerError::CurrencyMismatch { .. }));
    }

    #[test]
    fn test_unknown_account() {
        let ledger = AccountLedger::new();
        let mut staged = ledger.stage();
        let err = staged
            .apply_delta(AccountId::new(), &Money::new(dec!(5), Currency::Usd), 0)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_publishes() {
        let (ledger, id) =
            seeded_ledger(AccountKind::Checking, Money::new(dec!(100), Currency::Usd));
        let before = ledger.snapshot();

        let mut staged = ledger.stage();
        staged
            .apply_delta(id, &Money::new(dec!(50), Currency::Usd), 0)
            .unwrap();
        ledger.publish(staged);

        assert_eq!(before.account(id).unwrap().balance.amount, dec!(100));
        assert_eq!(ledger.get(id).unwrap().balance.amount, dec!(150));
    }

    #[test]
    fn test_duplicate_account_rejected() {
        let (ledger, id) =
            seeded_ledger(AccountKind::Checking, Money::new(dec!(1), Currency::Usd));
        let mut staged = ledger.stage();
        let mut copy = ledger.get(id).unwrap();
        copy.title = "Copy".to_string();
        assert!(matches!(
            staged.insert_account(copy),
            Err(LedgerError::DuplicateAccount(_))
        ));
    }
}

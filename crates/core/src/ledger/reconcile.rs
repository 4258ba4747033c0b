//! Balance reconciliation.
//!
//! Audits every account against the journal: the committed balance must
//! equal the signed sum of the account's journal legs.

use hearth_shared::types::{AccountId, Money};
use rayon::prelude::*;
use serde::Serialize;

use super::account::Account;
use super::account_ledger::AccountLedger;
use super::journal::{JournalEntry, JournalOffset, TransactionJournal};

/// An account whose balance disagrees with the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    /// The account ID.
    pub account_id: AccountId,
    /// Balance held by the ledger.
    pub ledger_balance: Money,
    /// Sum of journal legs; `None` if the legs mix currencies.
    pub journal_balance: Option<Money>,
}

/// Outcome of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Number of accounts audited.
    pub accounts_checked: usize,
    /// Journal watermark the audit was taken at.
    pub as_of: JournalOffset,
    /// Accounts that failed the audit.
    pub mismatches: Vec<Mismatch>,
}

impl ReconciliationReport {
    /// Returns true if every account matched its journal.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Audits every account against the journal.
///
/// Holds the journal writer while taking the snapshot, so no posting is
/// half-committed in what gets audited. The audit itself runs in parallel.
pub async fn reconcile(ledger: &AccountLedger, journal: &TransactionJournal) -> ReconciliationReport {
    let writer = journal.writer().await;
    let snapshot = ledger.snapshot();
    let entries = journal.committed_entries();
    let as_of = journal.committed_offset();
    drop(writer);

    let accounts: Vec<&Account> = snapshot.accounts().collect();
    let mut mismatches: Vec<Mismatch> = accounts
        .par_iter()
        .filter_map(|account| audit(account, &entries))
        .collect();
    mismatches.sort_by_key(|m| m.account_id);

    if mismatches.is_empty() {
        tracing::debug!(accounts = accounts.len(), as_of = %as_of, "Reconciliation clean");
    } else {
        tracing::error!(
            accounts = accounts.len(),
            mismatches = mismatches.len(),
            as_of = %as_of,
            "Reconciliation found balance mismatches"
        );
    }

    ReconciliationReport {
        accounts_checked: accounts.len(),
        as_of,
        mismatches,
    }
}

fn audit(account: &Account, entries: &[std::sync::Arc<JournalEntry>]) -> Option<Mismatch> {
    let journal_balance = entries
        .iter()
        .filter_map(|entry| entry.leg_for(account.id))
        .try_fold(Money::zero(account.currency()), |sum, leg| sum.checked_add(&leg.amount))
        .ok();

    if journal_balance == Some(account.balance) {
        return None;
    }
    Some(Mismatch {
        account_id: account.id,
        ledger_balance: account.balance,
        journal_balance,
    })
}

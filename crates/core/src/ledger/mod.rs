//! Ledger engine.
//!
//! This module implements the core ledger functionality:
//! - Accounts with balance policy and version counters
//! - The account ledger (committed snapshots and per-account locks)
//! - The append-only transaction journal
//! - The posting coordinator (validate, reserve, commit, compensate)
//! - Post-commit events and reconciliation
//! - The persistence boundary

pub mod account;
pub mod account_ledger;
pub mod error;
pub mod events;
pub mod journal;
pub mod posting;
pub mod reconcile;
pub mod store;
pub mod transaction;

#[cfg(test)]
mod posting_props;

pub use account::{Account, AccountKind, OpenAccount};
pub use account_ledger::{AccountLedger, AppliedDelta, LedgerSnapshot, StagedLedger};
pub use error::LedgerError;
pub use events::{EventPublisher, PostingEvent};
pub use journal::{
    AccountHistory, DateRange, EntryKind, JournalEntry, JournalLeg, JournalOffset, JournalWriter,
    TransactionJournal,
};
pub use posting::{LegRequest, PostingCoordinator, PostingReceipt, PostingRequest, PostingState};
pub use reconcile::{Mismatch, ReconciliationReport, reconcile};
pub use store::{BalanceUpdate, CasOutcome, LedgerStore, MemoryStore, StoreError};
pub use transaction::Transaction;

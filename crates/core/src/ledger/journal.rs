//! Append-only transaction journal.
//!
//! The journal is the source of truth for balances. Entries are appended by
//! a single writer at a time (offsets are assigned under the writer lock and
//! are never reused), and become visible to readers when the writer
//! publishes its committed watermark. A writer dropped before publishing
//! takes its appends with it. Voids append a reversal instead of deleting
//! anything.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hearth_shared::types::{
    AccountId, CategoryId, Currency, GoalId, Money, MoneyError, TransactionId, UserId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use super::error::LedgerError;
use super::transaction::Transaction;

/// Position of an entry in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JournalOffset(pub u64);

impl JournalOffset {
    /// Offset of the first entry.
    pub const ZERO: Self = Self(0);

    /// Raw offset value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for JournalOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    /// Opening balance of a new account.
    Opening,
    /// Regular income, expense or transfer.
    Posting,
    /// Compensating reversal of an earlier entry.
    Reversal {
        /// The transaction this entry negates.
        reverses: TransactionId,
    },
}

impl EntryKind {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Posting => "posting",
            Self::Reversal { .. } => "reversal",
        }
    }
}

/// One side of a journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLeg {
    /// The account the leg applies to.
    pub account_id: AccountId,
    /// Signed amount (negative = money leaves the account).
    pub amount: Money,
    /// Account version observed when the leg was posted.
    pub causal_version: u64,
}

/// An immutable journal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Assigned position in the journal.
    pub offset: JournalOffset,
    /// Unique transaction ID.
    pub transaction_id: TransactionId,
    /// Opening, posting or reversal.
    pub kind: EntryKind,
    /// Legs; a transfer has a debit and a credit leg.
    pub legs: Vec<JournalLeg>,
    /// Headline amount: the single leg, or the amount credited by a transfer.
    /// Reversals carry the negated amount of what they reverse.
    pub amount: Money,
    /// Category of the transaction.
    pub category_id: Option<CategoryId>,
    /// Goal the transaction contributes to.
    pub goal_id: Option<GoalId>,
    /// User who posted it.
    pub user_id: UserId,
    /// Business timestamp.
    pub timestamp: DateTime<Utc>,
    /// Free-form note.
    pub memo: Option<String>,
}

impl JournalEntry {
    /// The leg touching `account_id`, if any.
    #[must_use]
    pub fn leg_for(&self, account_id: AccountId) -> Option<&JournalLeg> {
        self.legs.iter().find(|leg| leg.account_id == account_id)
    }

    /// Returns true if any leg touches `account_id`.
    #[must_use]
    pub fn touches(&self, account_id: AccountId) -> bool {
        self.leg_for(account_id).is_some()
    }

    /// Returns true for compensating reversals.
    #[must_use]
    pub const fn is_reversal(&self) -> bool {
        matches!(self.kind, EntryKind::Reversal { .. })
    }

    /// Per-account views of every leg.
    pub fn transactions(&self) -> impl Iterator<Item = Transaction> + '_ {
        self.legs.iter().map(|leg| Transaction::from_leg(self, leg))
    }

    /// Builds the compensating reversal of an entry whose ledger mutation
    /// never happened. Legs keep their causal versions because the ledger
    /// did not move.
    pub(crate) fn compensation(&self, timestamp: DateTime<Utc>) -> Self {
        Self {
            offset: self.offset,
            transaction_id: TransactionId::new(),
            kind: EntryKind::Reversal {
                reverses: self.transaction_id,
            },
            legs: self
                .legs
                .iter()
                .map(|leg| JournalLeg {
                    account_id: leg.account_id,
                    amount: -leg.amount,
                    causal_version: leg.causal_version,
                })
                .collect(),
            amount: -self.amount,
            category_id: self.category_id,
            goal_id: self.goal_id,
            user_id: self.user_id,
            timestamp,
            memo: Some(format!("Compensation of {}", self.transaction_id)),
        }
    }
}

/// Half-open `[from, to)` time window; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    /// The unbounded range.
    #[must_use]
    pub const fn all() -> Self {
        Self { from: None, to: None }
    }

    /// `[from, to)`.
    #[must_use]
    pub const fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    /// Everything at or after `from`.
    #[must_use]
    pub const fn since(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    /// Returns true if `ts` lies in the range.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| ts >= from) && self.to.is_none_or(|to| ts < to)
    }
}

/// Ordered, restartable history of one account.
///
/// Ordered by timestamp, ties broken by journal offset. Each call to
/// [`AccountHistory::iter`] starts from the beginning; per-leg views are
/// built lazily while iterating.
#[derive(Debug, Clone)]
pub struct AccountHistory {
    account_id: AccountId,
    entries: Arc<[Arc<JournalEntry>]>,
}

impl AccountHistory {
    /// The account this history belongs to.
    #[must_use]
    pub const fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// Iterates the history from the start.
    #[must_use]
    pub fn iter(&self) -> HistoryIter<'_> {
        HistoryIter {
            account_id: self.account_id,
            inner: self.entries.iter(),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the account has no entries in the range.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a AccountHistory {
    type Item = Transaction;
    type IntoIter = HistoryIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over an [`AccountHistory`].
#[derive(Debug)]
pub struct HistoryIter<'a> {
    account_id: AccountId,
    inner: std::slice::Iter<'a, Arc<JournalEntry>>,
}

impl Iterator for HistoryIter<'_> {
    type Item = Transaction;

    fn next(&mut self) -> Option<Self::Item> {
        let account_id = self.account_id;
        self.inner.by_ref().find_map(|entry| {
            entry
                .leg_for(account_id)
                .map(|leg| Transaction::from_leg(entry, leg))
        })
    }
}

/// The append-only journal.
#[derive(Debug, Default)]
pub struct TransactionJournal {
    writer: Mutex<()>,
    entries: RwLock<Vec<Arc<JournalEntry>>>,
    index: DashMap<TransactionId, JournalOffset>,
    voided: DashMap<TransactionId, TransactionId>,
    committed: AtomicU64,
}

impl TransactionJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a journal from persisted entries, all of them committed.
    ///
    /// # Errors
    ///
    /// Returns `RestoreFailed` if the offsets are not exactly `0..n` in order.
    pub fn restore(entries: Vec<JournalEntry>) -> Result<Self, LedgerError> {
        let journal = Self::new();
        let mut stored = Vec::with_capacity(entries.len());
        for (position, entry) in entries.into_iter().enumerate() {
            let expected = JournalOffset(u64::try_from(position).unwrap_or(u64::MAX));
            if entry.offset != expected {
                return Err(LedgerError::RestoreFailed(format!(
                    "journal expected offset {expected}, found {}",
                    entry.offset
                )));
            }
            if journal.index.insert(entry.transaction_id, entry.offset).is_some() {
                return Err(LedgerError::RestoreFailed(format!(
                    "duplicate transaction {}",
                    entry.transaction_id
                )));
            }
            if let EntryKind::Reversal { reverses } = entry.kind {
                journal.voided.insert(reverses, entry.transaction_id);
            }
            stored.push(Arc::new(entry));
        }

        journal
            .committed
            .store(u64::try_from(stored.len()).unwrap_or(u64::MAX), Ordering::Release);
        *journal.entries.write().unwrap_or_else(PoisonError::into_inner) = stored;
        Ok(journal)
    }

    /// Waits for the single writer slot.
    pub async fn writer(&self) -> JournalWriter<'_> {
        JournalWriter {
            journal: self,
            _guard: self.writer.lock().await,
        }
    }

    /// Waits for the writer slot until `deadline`; `None` on timeout.
    pub async fn writer_until(&self, deadline: Instant) -> Option<JournalWriter<'_>> {
        let guard = tokio::time::timeout_at(deadline, self.writer.lock())
            .await
            .ok()?;
        Some(JournalWriter {
            journal: self,
            _guard: guard,
        })
    }

    /// Offset one past the last committed entry.
    #[must_use]
    pub fn committed_offset(&self) -> JournalOffset {
        JournalOffset(self.committed.load(Ordering::Acquire))
    }

    /// Number of committed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::try_from(self.committed.load(Ordering::Acquire)).unwrap_or(usize::MAX)
    }

    /// Returns true if nothing was committed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every committed entry in offset order.
    #[must_use]
    pub fn committed_entries(&self) -> Vec<Arc<JournalEntry>> {
        let watermark = self.len();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries[..watermark.min(entries.len())].to_vec()
    }

    /// A committed entry by transaction ID.
    #[must_use]
    pub fn get(&self, transaction_id: TransactionId) -> Option<Arc<JournalEntry>> {
        let offset = *self.index.get(&transaction_id)?;
        if offset >= self.committed_offset() {
            return None;
        }
        let index = usize::try_from(offset.value()).ok()?;
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    /// Returns true if a reversal of `transaction_id` has been appended.
    #[must_use]
    pub fn is_voided(&self, transaction_id: TransactionId) -> bool {
        self.voided.contains_key(&transaction_id)
    }

    /// The reversal recorded for `transaction_id`.
    #[must_use]
    pub fn reversal_of(&self, transaction_id: TransactionId) -> Option<TransactionId> {
        self.voided.get(&transaction_id).map(|r| *r.value())
    }

    /// Committed history of an account within `range`.
    #[must_use]
    pub fn entries_for(&self, account_id: AccountId, range: DateRange) -> AccountHistory {
        let mut matching: Vec<Arc<JournalEntry>> = self
            .committed_entries()
            .into_iter()
            .filter(|entry| entry.touches(account_id) && range.contains(entry.timestamp))
            .collect();
        matching.sort_by_key(|entry| (entry.timestamp, entry.offset));

        AccountHistory {
            account_id,
            entries: matching.into(),
        }
    }

    /// Committed entries tagged with `goal_id`, with the watermark they were read at.
    #[must_use]
    pub fn tagged_to(&self, goal_id: GoalId) -> (JournalOffset, Vec<Arc<JournalEntry>>) {
        let as_of = self.committed_offset();
        let entries = self
            .committed_entries()
            .into_iter()
            .filter(|entry| entry.offset < as_of && entry.goal_id == Some(goal_id))
            .collect();
        (as_of, entries)
    }

    /// Signed sum of every committed leg on an account.
    ///
    /// # Errors
    ///
    /// Returns `MoneyError::CurrencyMismatch` if a leg is in another currency.
    pub fn sum_for(&self, account_id: AccountId, currency: Currency) -> Result<Money, MoneyError> {
        self.committed_entries()
            .iter()
            .filter_map(|entry| entry.leg_for(account_id))
            .try_fold(Money::zero(currency), |total, leg| total.checked_add(&leg.amount))
    }
}

/// Exclusive append handle. Dropping it discards every unpublished append.
pub struct JournalWriter<'a> {
    journal: &'a TransactionJournal,
    _guard: MutexGuard<'a, ()>,
}

impl JournalWriter<'_> {
    /// Offset the next append will receive.
    #[must_use]
    pub fn next_offset(&self) -> JournalOffset {
        let len = self
            .journal
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        JournalOffset(u64::try_from(len).unwrap_or(u64::MAX))
    }

    /// Appends an entry, assigning it the next offset.
    ///
    /// The entry stays invisible to readers until [`JournalWriter::publish`].
    pub fn append(&mut self, mut entry: JournalEntry) -> Arc<JournalEntry> {
        let mut entries = self
            .journal
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entry.offset = JournalOffset(u64::try_from(entries.len()).unwrap_or(u64::MAX));

        self.journal.index.insert(entry.transaction_id, entry.offset);
        if let EntryKind::Reversal { reverses } = entry.kind {
            self.journal.voided.insert(reverses, entry.transaction_id);
        }

        let entry = Arc::new(entry);
        entries.push(Arc::clone(&entry));
        entry
    }

    /// Advances the committed watermark over everything appended so far.
    pub fn publish(&mut self) {
        let len = self
            .journal
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        self.journal
            .committed
            .store(u64::try_from(len).unwrap_or(u64::MAX), Ordering::Release);
    }
}

impl Drop for JournalWriter<'_> {
    fn drop(&mut self) {
        let committed = usize::try_from(self.journal.committed.load(Ordering::Acquire))
            .unwrap_or(usize::MAX);
        let mut entries = self
            .journal
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if entries.len() <= committed {
            return;
        }

        for entry in entries.drain(committed..) {
            self.journal.index.remove(&entry.transaction_id);
            if let EntryKind::Reversal { reverses } = entry.kind {
                self.journal.voided.remove(&reverses);
            }
        }
        tracing::warn!(
            committed,
            "Journal writer dropped with unpublished entries, discarded"
        );
    }
}

//! Per-account view of a journal entry.

use chrono::{DateTime, Utc};
use hearth_shared::types::{AccountId, CategoryId, GoalId, Money, TransactionId, UserId};
use serde::{Deserialize, Serialize};

use super::journal::{EntryKind, JournalEntry, JournalLeg, JournalOffset};

/// One leg of a posted transaction, as seen from the account it touched.
///
/// Immutable once appended; a void produces a new `Transaction` with
/// `EntryKind::Reversal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction the leg belongs to.
    pub id: TransactionId,
    /// Journal offset of the entry.
    pub offset: JournalOffset,
    /// Opening, posting or reversal.
    pub kind: EntryKind,
    /// The account the leg touched.
    pub account_id: AccountId,
    /// Category of the transaction.
    pub category_id: Option<CategoryId>,
    /// Goal the transaction is tagged to.
    pub goal_id: Option<GoalId>,
    /// Signed amount applied to the account.
    pub amount: Money,
    /// Business timestamp.
    pub timestamp: DateTime<Utc>,
    /// Account version observed when the leg was posted.
    pub causal_version: u64,
    /// User who posted it.
    pub user_id: UserId,
    /// Free-form note.
    pub memo: Option<String>,
}

impl Transaction {
    /// Builds the view of `leg` within `entry`.
    #[must_use]
    pub fn from_leg(entry: &JournalEntry, leg: &JournalLeg) -> Self {
        Self {
            id: entry.transaction_id,
            offset: entry.offset,
            kind: entry.kind,
            account_id: leg.account_id,
            category_id: entry.category_id,
            goal_id: entry.goal_id,
            amount: leg.amount,
            timestamp: entry.timestamp,
            causal_version: leg.causal_version,
            user_id: entry.user_id,
            memo: entry.memo.clone(),
        }
    }
}

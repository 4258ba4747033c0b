//! Outbound events emitted after a posting commits.
//!
//! Delivery is fire-and-forget: the coordinator never awaits a consumer and
//! never retries. When the channel is full the event is dropped with a warning.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use hearth_shared::types::{AccountId, CategoryId, Money, TransactionId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::journal::{EntryKind, JournalOffset};

/// A committed posting, as seen by outside collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingEvent {
    /// User who posted the transaction.
    pub user_id: UserId,
    /// The committed transaction.
    pub transaction_id: TransactionId,
    /// Headline amount.
    pub amount: Money,
    /// Opening, posting or reversal.
    pub kind: EntryKind,
    /// Accounts touched by the posting.
    pub accounts: Vec<AccountId>,
    /// Category, if any.
    pub category_id: Option<CategoryId>,
    /// Journal offset of the entry.
    pub offset: JournalOffset,
    /// Business timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Sending half of the event channel.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: Option<mpsc::Sender<PostingEvent>>,
    sent: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl EventPublisher {
    /// Creates a publisher with a bounded channel.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PostingEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let publisher = Self {
            tx: Some(tx),
            sent: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (publisher, rx)
    }

    /// A publisher that discards everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            tx: None,
            sent: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Hands an event to the consumer without waiting.
    pub fn publish(&self, event: PostingEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    transaction_id = %event.transaction_id,
                    "Event channel full, dropping posting event"
                );
            }
            Err(TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    transaction_id = %event.transaction_id,
                    "Event consumer gone, dropping posting event"
                );
            }
        }
    }

    /// Events accepted by the channel so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Events dropped because the consumer lagged or went away.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

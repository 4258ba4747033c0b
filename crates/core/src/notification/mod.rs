//! Per-user notifications fed by posting events.
//!
//! The center is the consumer side of the posting event channel: it runs in
//! its own task and the ledger never waits for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hearth_shared::types::{NotificationId, TransactionId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ledger::{EntryKind, PostingEvent};

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Spending, transfer or void.
    Transaction,
    /// Money received.
    Income,
}

impl NotificationKind {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Income => "income",
        }
    }
}

/// A notification shown to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification ID.
    pub id: NotificationId,
    /// Recipient.
    pub user_id: UserId,
    /// Short title.
    pub title: String,
    /// Message body.
    pub message: String,
    /// Kind.
    pub kind: NotificationKind,
    /// Transaction that triggered it, if any.
    pub transaction_id: Option<TransactionId>,
    /// Whether the user has seen it.
    pub is_read: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Stores notifications per user.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    by_user: DashMap<UserId, Vec<Notification>>,
    processed: AtomicU64,
}

impl NotificationCenter {
    /// Creates an empty center.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a notification directly.
    pub fn push(
        &self,
        user_id: UserId,
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
    ) -> Notification {
        self.store(Notification {
            id: NotificationId::new(),
            user_id,
            title: title.into(),
            message: message.into(),
            kind,
            transaction_id: None,
            is_read: false,
            created_at: Utc::now(),
        })
    }

    /// Turns a posting event into a notification for the posting user.
    ///
    /// Opening balances do not notify.
    pub fn record(&self, event: &PostingEvent) -> Option<Notification> {
        self.processed.fetch_add(1, Ordering::Release);

        let (title, message, kind) = match event.kind {
            EntryKind::Opening => return None,
            EntryKind::Reversal { reverses } => (
                "Transaction Voided",
                format!("Transaction {reverses} for {} has been voided.", event.amount.abs()),
                NotificationKind::Transaction,
            ),
            EntryKind::Posting if event.accounts.len() > 1 => (
                "Transfer Completed",
                format!("A transfer of {} has been completed.", event.amount.abs()),
                NotificationKind::Transaction,
            ),
            EntryKind::Posting if event.amount.is_positive() => (
                "Income Received",
                format!("Income of {} has been received.", event.amount),
                NotificationKind::Income,
            ),
            EntryKind::Posting => (
                "New Transaction",
                format!("A new transaction for {} has been created.", event.amount.abs()),
                NotificationKind::Transaction,
            ),
        };

        Some(self.store(Notification {
            id: NotificationId::new(),
            user_id: event.user_id,
            title: title.to_string(),
            message,
            kind,
            transaction_id: Some(event.transaction_id),
            is_read: false,
            created_at: Utc::now(),
        }))
    }

    fn store(&self, notification: Notification) -> Notification {
        self.by_user
            .entry(notification.user_id)
            .or_default()
            .push(notification.clone());
        notification
    }

    /// Consumes posting events until the channel closes.
    pub fn spawn(self: &Arc<Self>, mut rx: mpsc::Receiver<PostingEvent>) -> JoinHandle<()> {
        let center = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Some(notification) = center.record(&event) {
                    tracing::debug!(
                        user_id = %notification.user_id,
                        kind = notification.kind.as_str(),
                        "Notification recorded"
                    );
                }
            }
            tracing::debug!("Posting event channel closed");
        })
    }

    /// Events consumed so far, including the ones that did not notify.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    /// Every notification of a user, newest first.
    #[must_use]
    pub fn all_for(&self, user_id: UserId) -> Vec<Notification> {
        let mut list = self
            .by_user
            .get(&user_id)
            .map(|n| n.value().clone())
            .unwrap_or_default();
        list.reverse();
        list
    }

    /// Unread notifications of a user, newest first.
    #[must_use]
    pub fn unread(&self, user_id: UserId) -> Vec<Notification> {
        let mut list = self.all_for(user_id);
        list.retain(|n| !n.is_read);
        list
    }

    /// Marks a notification as read; false if it does not exist.
    pub fn mark_read(&self, user_id: UserId, id: NotificationId) -> bool {
        let Some(mut list) = self.by_user.get_mut(&user_id) else {
            return false;
        };
        match list.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.is_read = true;
                true
            }
            None => false,
        }
    }
}

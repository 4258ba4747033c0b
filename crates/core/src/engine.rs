//! Ledger engine facade.
//!
//! Wires the account ledger, journal, posting coordinator, goal tracker,
//! directory and notification consumer together behind one handle. The
//! storage handle is passed in explicitly; nothing here is global.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hearth_shared::AppError;
use hearth_shared::config::LedgerConfig;
use hearth_shared::types::{AccountId, GoalId, GroupId, TransactionId, UserId};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::directory::{Directory, DirectoryError};
use crate::goal::{Goal, GoalProgress, GoalTracker, GoalUpdate, NewGoal};
use crate::ledger::{
    Account, AccountHistory, AccountLedger, DateRange, EventPublisher, LedgerError, LedgerStore,
    MemoryStore, OpenAccount, PostingCoordinator, PostingReceipt, PostingRequest,
    ReconciliationReport, TransactionJournal, reconcile,
};
use crate::notification::NotificationCenter;
use crate::projection::{self, GroupSummary, UserOverview};

/// Errors returned by the engine facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Ledger, journal or goal error.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Directory error.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl EngineError {
    /// Returns the code of the underlying error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Ledger(e) => e.error_code(),
            Self::Directory(e) => e.error_code(),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Ledger(e) => e.into(),
            EngineError::Directory(e) => e.into(),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// The household ledger engine.
#[derive(Debug)]
pub struct LedgerEngine {
    coordinator: PostingCoordinator,
    goals: GoalTracker,
    directory: Directory,
    notifications: Arc<NotificationCenter>,
    consumer: JoinHandle<()>,
}

impl LedgerEngine {
    /// Creates an engine over `store` with an empty ledger and journal.
    ///
    /// Spawns the notification consumer, so it must be called from within a
    /// Tokio runtime.
    #[must_use]
    pub fn new(config: &LedgerConfig, store: Arc<dyn LedgerStore>) -> Self {
        Self::assemble(
            config,
            store,
            AccountLedger::new(),
            TransactionJournal::new(),
        )
    }

    /// Creates an engine from whatever `store` already holds.
    ///
    /// Accounts come back with their stored balances and versions, and the
    /// journal continues from the next persisted offset. The directory and
    /// goal definitions start empty.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if loading fails, or `RestoreFailed` if the journal
    /// has gaps or disagrees with the stored balances.
    pub async fn restore(config: &LedgerConfig, store: Arc<dyn LedgerStore>) -> EngineResult<Self> {
        let accounts = store.load_accounts().await.map_err(LedgerError::from)?;
        let entries = store.load_entries().await.map_err(LedgerError::from)?;
        let ledger = AccountLedger::restore(accounts)?;
        let journal = TransactionJournal::restore(entries)?;

        let report = reconcile(&ledger, &journal).await;
        if !report.is_consistent() {
            return Err(LedgerError::RestoreFailed(format!(
                "{} of {} accounts disagree with the journal at offset {}",
                report.mismatches.len(),
                report.accounts_checked,
                report.as_of
            ))
            .into());
        }

        tracing::info!(
            accounts = report.accounts_checked,
            offset = %report.as_of,
            "Ledger restored from store"
        );
        Ok(Self::assemble(config, store, ledger, journal))
    }

    fn assemble(
        config: &LedgerConfig,
        store: Arc<dyn LedgerStore>,
        ledger: AccountLedger,
        journal: TransactionJournal,
    ) -> Self {
        let ledger = Arc::new(ledger);
        let journal = Arc::new(journal);
        let (events, rx) = EventPublisher::channel(config.notification_buffer);
        let notifications = Arc::new(NotificationCenter::new());
        let consumer = notifications.spawn(rx);

        let goals = GoalTracker::new(Arc::clone(&journal), config.goal_cache_capacity);
        let coordinator =
            PostingCoordinator::new(ledger, journal, store, events, config.lock_timeout());

        tracing::info!(
            lock_timeout_ms = config.lock_timeout_ms,
            goal_cache_capacity = config.goal_cache_capacity,
            notification_buffer = config.notification_buffer,
            "Ledger engine started"
        );

        Self {
            coordinator,
            goals,
            directory: Directory::new(),
            notifications,
            consumer,
        }
    }

    /// Creates an engine backed by an in-process [`MemoryStore`].
    #[must_use]
    pub fn in_memory(config: &LedgerConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    /// The posting coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &PostingCoordinator {
        &self.coordinator
    }

    /// The account ledger.
    #[must_use]
    pub fn ledger(&self) -> &AccountLedger {
        self.coordinator.ledger()
    }

    /// The transaction journal.
    #[must_use]
    pub fn journal(&self) -> &TransactionJournal {
        self.coordinator.journal()
    }

    /// Users, groups and categories.
    #[must_use]
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Goal definitions.
    #[must_use]
    pub fn goals(&self) -> &GoalTracker {
        &self.goals
    }

    /// Recorded notifications.
    #[must_use]
    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    /// Opens an account and links it to its group.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound` / `UserNotFound` for unknown references, or
    /// any error of [`PostingCoordinator::open_account`].
    pub async fn open_account(&self, input: OpenAccount) -> EngineResult<Account> {
        if self.directory.group(input.group_id).is_none() {
            return Err(DirectoryError::GroupNotFound(input.group_id).into());
        }
        if self.directory.user(input.owner).is_none() {
            return Err(DirectoryError::UserNotFound(input.owner).into());
        }
        let group_id = input.group_id;
        let account = self.coordinator.open_account(input).await?;
        self.directory.link_account(account.id, group_id)?;
        Ok(account)
    }

    /// Current committed state of an account.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound` if the account does not exist.
    pub fn account(&self, account_id: AccountId) -> EngineResult<Account> {
        self.ledger()
            .get(account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id).into())
    }

    /// Posts a transaction.
    ///
    /// # Errors
    ///
    /// See [`PostingCoordinator::post`].
    pub async fn post(&self, request: PostingRequest) -> EngineResult<PostingReceipt> {
        self.post_cancellable(request, &CancellationToken::new()).await
    }

    /// Posts a transaction that the caller may cancel before reservation.
    ///
    /// # Errors
    ///
    /// See [`PostingCoordinator::post`].
    pub async fn post_cancellable(
        &self,
        request: PostingRequest,
        cancel: &CancellationToken,
    ) -> EngineResult<PostingReceipt> {
        Ok(self.coordinator.post(request, cancel).await?)
    }

    /// Voids a transaction.
    ///
    /// # Errors
    ///
    /// See [`PostingCoordinator::void`].
    pub async fn void(
        &self,
        transaction_id: TransactionId,
        user_id: UserId,
    ) -> EngineResult<PostingReceipt> {
        Ok(self
            .coordinator
            .void(transaction_id, user_id, Utc::now(), &CancellationToken::new())
            .await?)
    }

    /// Committed history of an account.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound` if the account does not exist.
    pub fn history(&self, account_id: AccountId, range: DateRange) -> EngineResult<AccountHistory> {
        self.account(account_id)?;
        Ok(self.journal().entries_for(account_id, range))
    }

    /// Creates a goal in an existing group.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound` or `InvalidGoal`.
    pub fn create_goal(&self, input: NewGoal) -> EngineResult<Goal> {
        if self.directory.group(input.group_id).is_none() {
            return Err(DirectoryError::GroupNotFound(input.group_id).into());
        }
        Ok(self.goals.create(input)?)
    }

    /// Edits a goal's descriptive fields.
    ///
    /// # Errors
    ///
    /// Returns `GoalNotFound` or `InvalidGoal`.
    pub fn update_goal(&self, goal_id: GoalId, update: GoalUpdate) -> EngineResult<Goal> {
        Ok(self.goals.update(goal_id, update)?)
    }

    /// Derived progress of a goal.
    ///
    /// # Errors
    ///
    /// Returns `GoalNotFound`.
    pub fn goal_progress(&self, goal_id: GoalId) -> EngineResult<Arc<GoalProgress>> {
        Ok(self.goals.progress(goal_id)?)
    }

    /// Audits every balance against the journal.
    pub async fn reconcile(&self) -> ReconciliationReport {
        reconcile(self.ledger(), self.journal()).await
    }

    /// Waits until the notification consumer has caught up with every sent
    /// event, or `timeout` elapses. Returns true if it caught up.
    pub async fn settle_notifications(&self, timeout: Duration) -> bool {
        let caught_up = || self.notifications.processed() >= self.coordinator.events().sent();
        let deadline = tokio::time::Instant::now() + timeout;
        while !caught_up() {
            if self.consumer.is_finished() || tokio::time::Instant::now() >= deadline {
                return caught_up();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    /// Everything about one user.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound`.
    pub fn user_overview(&self, user_id: UserId) -> EngineResult<UserOverview> {
        projection::user_overview(self, user_id)
    }

    /// Everything about one group.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound`.
    pub fn group_summary(&self, group_id: GroupId) -> EngineResult<GroupSummary> {
        projection::group_summary(self, group_id)
    }
}

impl Drop for LedgerEngine {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

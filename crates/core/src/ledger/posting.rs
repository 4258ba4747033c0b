//! Posting coordinator.
//!
//! Each request moves through `Validated -> Reserved -> Committed`, or ends
//! in `Rejected`. Reservation takes per-account locks in ascending account
//! order with a bounded wait. Commit appends the journal entry first and then
//! applies every leg to the ledger; if the durable balance update fails after
//! the append, a compensating reversal is appended and the posting surfaces
//! as `PostingFailed`. The commit runs on its own task holding the account
//! locks, so a caller that stops waiting cannot leave it half done.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hearth_shared::types::{AccountId, CategoryId, GoalId, Money, TransactionId, UserId};
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::account::{Account, OpenAccount};
use super::account_ledger::{AccountLedger, AppliedDelta};
use super::error::LedgerError;
use super::events::{EventPublisher, PostingEvent};
use super::journal::{EntryKind, JournalEntry, JournalLeg, JournalOffset, JournalWriter, TransactionJournal};
use super::store::{BalanceUpdate, CasOutcome, LedgerStore};
use super::transaction::Transaction;

/// Lifecycle of a posting request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingState {
    /// Passed validation against the latest snapshot.
    Validated,
    /// Every account lock is held.
    Reserved,
    /// Appended to the journal and applied to the ledger.
    Committed,
    /// Refused without side effects.
    Rejected,
}

impl std::fmt::Display for PostingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validated => write!(f, "validated"),
            Self::Reserved => write!(f, "reserved"),
            Self::Committed => write!(f, "committed"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// One requested leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegRequest {
    /// Target account.
    pub account_id: AccountId,
    /// Signed amount (negative = debit).
    pub amount: Money,
    /// Version the caller last observed; `None` accepts the current one.
    pub expected_version: Option<u64>,
}

/// A posting request.
#[derive(Debug, Clone)]
pub struct PostingRequest {
    /// Legs to apply atomically.
    pub legs: Vec<LegRequest>,
    /// Category of the transaction.
    pub category_id: Option<CategoryId>,
    /// Goal the transaction contributes to.
    pub goal_id: Option<GoalId>,
    /// Posting user.
    pub user_id: UserId,
    /// Business timestamp.
    pub timestamp: DateTime<Utc>,
    /// Free-form note.
    pub memo: Option<String>,
}

impl PostingRequest {
    /// Income (positive) or expense (negative) on one account.
    #[must_use]
    pub fn single(user_id: UserId, account_id: AccountId, amount: Money) -> Self {
        Self {
            legs: vec![LegRequest {
                account_id,
                amount,
                expected_version: None,
            }],
            category_id: None,
            goal_id: None,
            user_id,
            timestamp: Utc::now(),
            memo: None,
        }
    }

    /// Moves `amount` from one account to another as a single two-leg transaction.
    #[must_use]
    pub fn transfer(user_id: UserId, from: AccountId, to: AccountId, amount: Money) -> Self {
        Self {
            legs: vec![
                LegRequest {
                    account_id: from,
                    amount: -amount,
                    expected_version: None,
                },
                LegRequest {
                    account_id: to,
                    amount,
                    expected_version: None,
                },
            ],
            category_id: None,
            goal_id: None,
            user_id,
            timestamp: Utc::now(),
            memo: None,
        }
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    /// Tags the transaction to a goal.
    #[must_use]
    pub fn with_goal(mut self, goal_id: GoalId) -> Self {
        self.goal_id = Some(goal_id);
        self
    }

    /// Sets the memo.
    #[must_use]
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// Sets the business timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Requires `account_id` to still be at `version` when the posting commits.
    #[must_use]
    pub fn expecting_version(mut self, account_id: AccountId, version: u64) -> Self {
        for leg in &mut self.legs {
            if leg.account_id == account_id {
                leg.expected_version = Some(version);
            }
        }
        self
    }

    fn account_ids(&self) -> Vec<AccountId> {
        self.legs.iter().map(|leg| leg.account_id).collect()
    }
}

/// Result of a committed posting.
#[derive(Debug, Clone)]
pub struct PostingReceipt {
    /// The committed journal entry.
    pub entry: Arc<JournalEntry>,
    /// New balance and version of each touched account.
    pub balances: Vec<AppliedDelta>,
}

impl PostingReceipt {
    /// ID of the committed transaction.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.entry.transaction_id
    }

    /// Journal offset of the committed entry.
    #[must_use]
    pub fn offset(&self) -> JournalOffset {
        self.entry.offset
    }

    /// New state of one touched account.
    #[must_use]
    pub fn balance_of(&self, account_id: AccountId) -> Option<&AppliedDelta> {
        self.balances.iter().find(|b| b.account_id == account_id)
    }

    /// Per-account views of the committed transaction.
    #[must_use]
    pub fn transactions(&self) -> Vec<Transaction> {
        self.entry.transactions().collect()
    }
}

/// An entry ready to be committed under held locks.
struct Draft {
    transaction_id: TransactionId,
    kind: EntryKind,
    legs: Vec<LegRequest>,
    amount: Money,
    category_id: Option<CategoryId>,
    goal_id: Option<GoalId>,
    user_id: UserId,
    timestamp: DateTime<Utc>,
    memo: Option<String>,
}

/// Validates, reserves and commits postings.
#[derive(Clone)]
pub struct PostingCoordinator {
    ledger: Arc<AccountLedger>,
    journal: Arc<TransactionJournal>,
    store: Arc<dyn LedgerStore>,
    events: EventPublisher,
    lock_timeout: Duration,
}

impl std::fmt::Debug for PostingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostingCoordinator")
            .field("accounts", &self.ledger.snapshot().len())
            .field("committed_offset", &self.journal.committed_offset())
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

impl PostingCoordinator {
    /// Creates a coordinator over shared ledger state.
    #[must_use]
    pub fn new(
        ledger: Arc<AccountLedger>,
        journal: Arc<TransactionJournal>,
        store: Arc<dyn LedgerStore>,
        events: EventPublisher,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            journal,
            store,
            events,
            lock_timeout,
        }
    }

    /// The account ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<AccountLedger> {
        &self.ledger
    }

    /// The transaction journal.
    #[must_use]
    pub fn journal(&self) -> &Arc<TransactionJournal> {
        &self.journal
    }

    /// The event publisher.
    #[must_use]
    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Opens an account at version 0 and posts its opening balance.
    ///
    /// # Errors
    ///
    /// - `InsufficientFunds` for a negative opening balance without overdraft
    /// - `Storage` if the account row cannot be persisted
    pub async fn open_account(&self, input: OpenAccount) -> Result<Account, LedgerError> {
        let opening = input.opening_balance;
        let account = Account {
            id: AccountId::new(),
            group_id: input.group_id,
            owner: input.owner,
            title: input.title,
            kind: input.kind,
            overdraft_allowed: input.overdraft_allowed && input.kind.supports_overdraft(),
            balance: Money::zero(opening.currency),
            version: 0,
            opened_at: input.opened_at,
        };
        account.check_policy(&opening, &opening)?;

        // Nobody can see the ID yet; holding the lock keeps it that way
        // until the opening entry is in.
        let lock = self.ledger.lock_for(account.id);
        let guard = lock.lock_owned().await;

        let mut staged = self.ledger.stage();
        staged.insert_account(account.clone())?;
        self.store.insert_account(&account).await?;
        self.ledger.publish(staged);

        tracing::info!(
            account_id = %account.id,
            kind = %account.kind,
            currency = %account.currency(),
            "Account opened"
        );

        if !opening.is_zero() {
            let draft = Draft {
                transaction_id: TransactionId::new(),
                kind: EntryKind::Opening,
                legs: vec![LegRequest {
                    account_id: account.id,
                    amount: opening,
                    expected_version: Some(0),
                }],
                amount: opening,
                category_id: None,
                goal_id: None,
                user_id: account.owner,
                timestamp: account.opened_at,
                memo: Some("Opening balance".to_string()),
            };
            self.commit_detached(vec![guard], draft, Instant::now() + self.lock_timeout)
                .await?;
        }

        self.ledger
            .get(account.id)
            .ok_or(LedgerError::AccountNotFound(account.id))
    }

    /// Posts a transaction.
    ///
    /// Cancellation through `cancel` is honoured until every account lock is
    /// held; after that the posting runs to completion, even if the returned
    /// future is dropped.
    ///
    /// # Errors
    ///
    /// Validation errors come back before any side effect. `VersionConflict`
    /// and `LockTimeout` are retryable. `PostingFailed` means the journal
    /// append had to be compensated.
    pub async fn post(
        &self,
        request: PostingRequest,
        cancel: &CancellationToken,
    ) -> Result<PostingReceipt, LedgerError> {
        let transaction_id = TransactionId::new();
        let result = self.post_inner(transaction_id, request, cancel).await;
        if let Err(e) = &result {
            tracing::debug!(
                transaction_id = %transaction_id,
                state = %PostingState::Rejected,
                code = e.error_code(),
                error = %e,
                "Posting rejected"
            );
        }
        result
    }

    async fn post_inner(
        &self,
        transaction_id: TransactionId,
        request: PostingRequest,
        cancel: &CancellationToken,
    ) -> Result<PostingReceipt, LedgerError> {
        let amount = self.validate(&request)?;
        tracing::debug!(transaction_id = %transaction_id, state = %PostingState::Validated);

        let deadline = Instant::now() + self.lock_timeout;
        let guards = self.reserve(&request.account_ids(), deadline, cancel).await?;
        tracing::debug!(transaction_id = %transaction_id, state = %PostingState::Reserved);

        let draft = Draft {
            transaction_id,
            kind: EntryKind::Posting,
            legs: request.legs,
            amount,
            category_id: request.category_id,
            goal_id: request.goal_id,
            user_id: request.user_id,
            timestamp: request.timestamp,
            memo: request.memo,
        };
        self.commit_detached(guards, draft, deadline).await
    }

    /// Voids a transaction by appending its reversal.
    ///
    /// # Errors
    ///
    /// - `TransactionNotFound` if the transaction does not exist or was already voided
    /// - `CannotVoidReversal` for reversal entries
    /// - `InsufficientFunds` if reversing would overdraw an account
    pub async fn void(
        &self,
        transaction_id: TransactionId,
        user_id: UserId,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<PostingReceipt, LedgerError> {
        let original = self.voidable(transaction_id)?;
        let accounts: Vec<AccountId> = original.legs.iter().map(|leg| leg.account_id).collect();

        let deadline = Instant::now() + self.lock_timeout;
        let guards = self.reserve(&accounts, deadline, cancel).await?;

        // A concurrent void may have won the race while we waited.
        let original = self.voidable(transaction_id)?;

        let draft = Draft {
            transaction_id: TransactionId::new(),
            kind: EntryKind::Reversal {
                reverses: original.transaction_id,
            },
            legs: original
                .legs
                .iter()
                .map(|leg| LegRequest {
                    account_id: leg.account_id,
                    amount: -leg.amount,
                    expected_version: None,
                })
                .collect(),
            amount: -original.amount,
            category_id: original.category_id,
            goal_id: original.goal_id,
            user_id,
            timestamp: at,
            memo: Some(format!("Void of {transaction_id}")),
        };
        self.commit_detached(guards, draft, deadline).await
    }

    fn voidable(&self, transaction_id: TransactionId) -> Result<Arc<JournalEntry>, LedgerError> {
        let entry = self
            .journal
            .get(transaction_id)
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
        if entry.is_reversal() {
            return Err(LedgerError::CannotVoidReversal(transaction_id));
        }
        if self.journal.is_voided(transaction_id) {
            return Err(LedgerError::TransactionNotFound(transaction_id));
        }
        Ok(entry)
    }

    /// Checks a request against the latest committed snapshot and returns
    /// its headline amount.
    fn validate(&self, request: &PostingRequest) -> Result<Money, LedgerError> {
        let Some(first) = request.legs.first() else {
            return Err(LedgerError::EmptyPosting);
        };

        let snapshot = self.ledger.snapshot();
        let mut seen = BTreeSet::new();
        for leg in &request.legs {
            if leg.amount.is_zero() {
                return Err(LedgerError::ZeroAmount(leg.account_id));
            }
            if !seen.insert(leg.account_id) {
                return Err(LedgerError::DuplicateLeg(leg.account_id));
            }
            let account = snapshot
                .account(leg.account_id)
                .ok_or(LedgerError::AccountNotFound(leg.account_id))?;
            if leg.amount.currency != account.currency() {
                return Err(LedgerError::CurrencyMismatch {
                    expected: account.currency(),
                    actual: leg.amount.currency,
                });
            }
            let projected = account.balance.checked_add(&leg.amount)?;
            account.check_policy(&projected, &leg.amount)?;
        }

        if request.legs.len() == 1 {
            return Ok(first.amount);
        }

        let residual = request
            .legs
            .iter()
            .try_fold(Money::zero(first.amount.currency), |sum, leg| {
                sum.checked_add(&leg.amount)
            })?;
        if !residual.is_zero() {
            return Err(LedgerError::UnbalancedTransfer { residual });
        }

        let credited = request
            .legs
            .iter()
            .filter(|leg| leg.amount.is_positive())
            .try_fold(Money::zero(first.amount.currency), |sum, leg| {
                sum.checked_add(&leg.amount)
            })?;
        Ok(credited)
    }

    /// Takes every account lock in ascending ID order.
    ///
    /// On timeout or cancellation the guards taken so far are dropped.
    async fn reserve(
        &self,
        accounts: &[AccountId],
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Vec<OwnedMutexGuard<()>>, LedgerError> {
        let mut ordered = accounts.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for account_id in ordered {
            let lock = self.ledger.lock_for(account_id);
            let guard = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(LedgerError::Cancelled),
                acquired = tokio::time::timeout_at(deadline, lock.lock_owned()) => {
                    acquired.map_err(|_| self.timed_out(format!("account {account_id}")))?
                }
            };
            guards.push(guard);
        }
        Ok(guards)
    }

    fn timed_out(&self, resource: String) -> LedgerError {
        tracing::warn!(resource = %resource, "Lock wait timed out");
        LedgerError::LockTimeout {
            resource,
            waited_ms: u64::try_from(self.lock_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Runs [`Self::commit`] on a spawned task that owns the account locks.
    ///
    /// Once spawned the commit finishes even if this future is dropped; the
    /// locks are released only after the ledger and journal are published.
    async fn commit_detached(
        &self,
        guards: Vec<OwnedMutexGuard<()>>,
        draft: Draft,
        deadline: Instant,
    ) -> Result<PostingReceipt, LedgerError> {
        let transaction_id = draft.transaction_id;
        let coordinator = self.clone();
        let task = tokio::spawn(async move {
            let result = coordinator.commit(draft, deadline).await;
            drop(guards);
            result
        });

        task.await.unwrap_or_else(|e| {
            tracing::error!(
                transaction_id = %transaction_id,
                error = %e,
                "Commit task did not complete"
            );
            Err(LedgerError::CommitAborted {
                transaction_id,
                reason: e.to_string(),
            })
        })
    }

    /// Appends the draft and applies it. Caller holds every account lock.
    async fn commit(&self, draft: Draft, deadline: Instant) -> Result<PostingReceipt, LedgerError> {
        let mut staged = self.ledger.stage();
        let mut legs = Vec::with_capacity(draft.legs.len());
        let mut balances = Vec::with_capacity(draft.legs.len());
        for leg in &draft.legs {
            let current = staged
                .current(leg.account_id)
                .ok_or(LedgerError::AccountNotFound(leg.account_id))?;
            let observed = leg.expected_version.unwrap_or(current.version);
            let applied = staged.apply_delta(leg.account_id, &leg.amount, observed)?;
            legs.push(JournalLeg {
                account_id: leg.account_id,
                amount: leg.amount,
                causal_version: observed,
            });
            balances.push(applied);
        }

        let mut writer = self
            .journal
            .writer_until(deadline)
            .await
            .ok_or_else(|| self.timed_out("journal writer".to_string()))?;

        let entry = JournalEntry {
            offset: writer.next_offset(),
            transaction_id: draft.transaction_id,
            kind: draft.kind,
            legs,
            amount: draft.amount,
            category_id: draft.category_id,
            goal_id: draft.goal_id,
            user_id: draft.user_id,
            timestamp: draft.timestamp,
            memo: draft.memo,
        };
        self.store.append(&entry).await?;
        let entry = writer.append(entry);

        let updates: Vec<BalanceUpdate> = balances
            .iter()
            .map(|applied| BalanceUpdate {
                account_id: applied.account_id,
                expected_version: applied.new_version - 1,
                new_version: applied.new_version,
                balance: applied.new_balance,
            })
            .collect();
        match self.store.compare_and_set(&updates).await {
            Ok(CasOutcome::Applied) => {}
            Ok(CasOutcome::Conflict { account_id }) => {
                let reason = format!("stored version of account {account_id} moved on");
                return Err(self.compensate(&mut writer, &entry, reason).await);
            }
            Err(e) => return Err(self.compensate(&mut writer, &entry, e.to_string()).await),
        }

        // Journal first: no reader sees a balance ahead of its history.
        writer.publish();
        self.ledger.publish(staged);
        drop(writer);

        tracing::info!(
            transaction_id = %entry.transaction_id,
            offset = %entry.offset,
            kind = entry.kind.as_str(),
            amount = %entry.amount,
            state = %PostingState::Committed,
            "Posting committed"
        );

        self.events.publish(PostingEvent {
            user_id: entry.user_id,
            transaction_id: entry.transaction_id,
            amount: entry.amount,
            kind: entry.kind,
            accounts: entry.legs.iter().map(|leg| leg.account_id).collect(),
            category_id: entry.category_id,
            offset: entry.offset,
            timestamp: entry.timestamp,
        });

        Ok(PostingReceipt { entry, balances })
    }

    /// Appends the reversal of an entry whose ledger update failed.
    ///
    /// The reversal is persisted once; a failure there is logged and
    /// reported through `repaired`.
    async fn compensate(
        &self,
        writer: &mut JournalWriter<'_>,
        entry: &JournalEntry,
        reason: String,
    ) -> LedgerError {
        tracing::error!(
            transaction_id = %entry.transaction_id,
            reason = %reason,
            "Ledger update failed after journal append, compensating"
        );

        let mut reversal = entry.compensation(Utc::now());
        reversal.offset = writer.next_offset();
        let repaired = match self.store.append(&reversal).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    transaction_id = %entry.transaction_id,
                    reversal_id = %reversal.transaction_id,
                    error = %e,
                    "Compensating reversal could not be persisted"
                );
                false
            }
        };
        writer.append(reversal);
        writer.publish();

        LedgerError::PostingFailed {
            transaction_id: entry.transaction_id,
            reason,
            repaired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::account::AccountKind;
    use crate::ledger::store::MemoryStore;
    use hearth_shared::types::{Currency, GroupId};
    use rust_decimal_macros::dec;

    fn coordinator() -> PostingCoordinator {
        PostingCoordinator::new(
            Arc::new(AccountLedger::new()),
            Arc::new(TransactionJournal::new()),
            Arc::new(MemoryStore::new()),
            EventPublisher::disabled(),
            Duration::from_millis(200),
        )
    }

    async fn open(
        coordinator: &PostingCoordinator,
        kind: AccountKind,
        opening: Money,
    ) -> Account {
        coordinator
            .open_account(OpenAccount::new(
                GroupId::new(),
                UserId::new(),
                "Account",
                kind,
                opening,
            ))
            .await
            .unwrap()
    }

    fn usd(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::Usd)
    }

    #[tokio::test]
    async fn test_open_account_posts_opening_entry() {
        let coordinator = coordinator();
        let account = open(&coordinator, AccountKind::Checking, usd(dec!(50000))).await;
        assert_eq!(account.version, 1);
        assert_eq!(account.balance.amount, dec!(50000));

        let history = coordinator.journal().entries_for(account.id, Default::default());
        let kinds: Vec<_> = history.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![EntryKind::Opening]);
    }

    #[tokio::test]
    async fn test_zero_opening_balance_has_no_entry() {
        let coordinator = coordinator();
        let account = open(&coordinator, AccountKind::Cash, Money::zero(Currency::Rub)).await;
        assert_eq!(account.version, 0);
        assert!(coordinator.journal().is_empty());
    }

    #[tokio::test]
    async fn test_negative_opening_balance_needs_overdraft() {
        let coordinator = coordinator();
        let err = coordinator
            .open_account(OpenAccount::new(
                GroupId::new(),
                UserId::new(),
                "Savings",
                AccountKind::Savings,
                usd(dec!(-1)),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert!(coordinator.ledger().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_validation_rejects_malformed_requests() {
        let coordinator = coordinator();
        let a = open(&coordinator, AccountKind::Checking, usd(dec!(10))).await;
        let b = open(&coordinator, AccountKind::Checking, usd(dec!(10))).await;
        let user = UserId::new();
        let cancel = CancellationToken::new();

        let empty = PostingRequest {
            legs: vec![],
            ..PostingRequest::single(user, a.id, usd(dec!(1)))
        };
        assert!(matches!(
            coordinator.post(empty, &cancel).await,
            Err(LedgerError::EmptyPosting)
        ));

        let zero = PostingRequest::single(user, a.id, usd(dec!(0)));
        assert!(matches!(
            coordinator.post(zero, &cancel).await,
            Err(LedgerError::ZeroAmount(_))
        ));

        let self_transfer = PostingRequest::transfer(user, a.id, a.id, usd(dec!(1)));
        assert!(matches!(
            coordinator.post(self_transfer, &cancel).await,
            Err(LedgerError::DuplicateLeg(_))
        ));

        let mut unbalanced = PostingRequest::transfer(user, a.id, b.id, usd(dec!(1)));
        unbalanced.legs[1].amount = usd(dec!(2));
        assert!(matches!(
            coordinator.post(unbalanced, &cancel).await,
            Err(LedgerError::UnbalancedTransfer { .. })
        ));

        let foreign = PostingRequest::single(user, a.id, Money::new(dec!(1), Currency::Eur));
        assert!(matches!(
            coordinator.post(foreign, &cancel).await,
            Err(LedgerError::CurrencyMismatch { .. })
        ));

        // Nothing beyond the two opening entries reached the journal.
        assert_eq!(coordinator.journal().len(), 2);
    }

    #[tokio::test]
    async fn test_expected_version_conflict() {
        let coordinator = coordinator();
        let account = open(&coordinator, AccountKind::Checking, usd(dec!(100))).await;
        let request = PostingRequest::single(UserId::new(), account.id, usd(dec!(-5)))
            .expecting_version(account.id, 0);

        let err = coordinator
            .post(request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, LedgerError::VersionConflict { actual: 1, .. }));
        assert_eq!(coordinator.ledger().get(account.id).unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_reservation() {
        let coordinator = coordinator();
        let account = open(&coordinator, AccountKind::Checking, usd(dec!(100))).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = coordinator
            .post(PostingRequest::single(UserId::new(), account.id, usd(dec!(1))), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Cancelled));
        assert_eq!(coordinator.journal().len(), 1);
    }

    #[tokio::test]
    async fn test_lock_timeout_releases_everything() {
        let coordinator = coordinator();
        let a = open(&coordinator, AccountKind::Checking, usd(dec!(100))).await;
        let b = open(&coordinator, AccountKind::Checking, usd(dec!(100))).await;
        let (low, high) = if a.id < b.id { (a.id, b.id) } else { (b.id, a.id) };

        // Hold the higher lock so the transfer reserves the lower one first.
        let held = coordinator.ledger().lock_for(high);
        let guard = held.lock_owned().await;

        let err = coordinator
            .post(
                PostingRequest::transfer(UserId::new(), low, high, usd(dec!(1))),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::LockTimeout { waited_ms: 200, .. }));

        // The lower lock was released on the way out.
        assert!(coordinator.ledger().lock_for(low).try_lock().is_ok());
        drop(guard);
    }

    #[tokio::test]
    async fn test_void_twice_is_not_found() {
        let coordinator = coordinator();
        let account = open(&coordinator, AccountKind::Checking, usd(dec!(100))).await;
        let user = UserId::new();
        let cancel = CancellationToken::new();

        let receipt = coordinator
            .post(PostingRequest::single(user, account.id, usd(dec!(-40))), &cancel)
            .await
            .unwrap();
        let reversal = coordinator
            .void(receipt.transaction_id(), user, Utc::now(), &cancel)
            .await
            .unwrap();
        assert_eq!(reversal.balance_of(account.id).unwrap().new_balance.amount, dec!(100));

        let err = coordinator
            .void(receipt.transaction_id(), user, Utc::now(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TransactionNotFound(_)));

        let err = coordinator
            .void(reversal.transaction_id(), user, Utc::now(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::CannotVoidReversal(_)));

        assert_eq!(coordinator.ledger().get(account.id).unwrap().balance.amount, dec!(100));
    }

    #[tokio::test]
    async fn test_void_respects_balance_policy() {
        let coordinator = coordinator();
        let savings = open(&coordinator, AccountKind::Savings, usd(dec!(0))).await;
        let user = UserId::new();
        let cancel = CancellationToken::new();

        let income = coordinator
            .post(PostingRequest::single(user, savings.id, usd(dec!(100))), &cancel)
            .await
            .unwrap();
        coordinator
            .post(PostingRequest::single(user, savings.id, usd(dec!(-80))), &cancel)
            .await
            .unwrap();

        let err = coordinator
            .void(income.transaction_id(), user, Utc::now(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert!(!coordinator.journal().is_voided(income.transaction_id()));
    }

    #[test]
    fn test_transfer_builder_legs() {
        let user = UserId::new();
        let (from, to) = (AccountId::new(), AccountId::new());
        let request = PostingRequest::transfer(user, from, to, usd(dec!(500)));
        assert_eq!(request.legs[0].amount.amount, dec!(-500));
        assert_eq!(request.legs[1].amount.amount, dec!(500));
        assert_eq!(request.account_ids(), vec![from, to]);
    }
}

//! End-to-end ledger scenarios through the engine facade.

#![allow(clippy::too_many_lines)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use hearth_core::directory::{CategoryKind, MemberRole, NewUser, UserRole};
use hearth_core::goal::NewGoal;
use hearth_core::ledger::{
    Account, AccountKind, BalanceUpdate, CasOutcome, DateRange, EntryKind, JournalEntry,
    JournalLeg, JournalOffset, LedgerError, LedgerStore, MemoryStore, OpenAccount,
    PostingRequest, StoreError,
};
use hearth_core::{EngineError, LedgerEngine};
use hearth_shared::config::LedgerConfig;
use hearth_shared::types::{AccountId, Currency, GroupId, Money, TransactionId, UserId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

struct Household {
    engine: LedgerEngine,
    user: UserId,
    group: GroupId,
}

fn household() -> Household {
    household_with(Arc::new(MemoryStore::new()))
}

fn household_with(store: Arc<dyn LedgerStore>) -> Household {
    let engine = LedgerEngine::new(&LedgerConfig::default(), store);
    let user = engine
        .directory()
        .create_user(NewUser::new("john@example.com", "John Doe").with_role(UserRole::Admin))
        .unwrap();
    let (group, _) = engine
        .directory()
        .create_group("Ivanov Family", user.id)
        .unwrap();
    Household {
        engine,
        user: user.id,
        group: group.id,
    }
}

impl Household {
    async fn open(&self, title: &str, kind: AccountKind, opening: Money) -> Account {
        self.engine
            .open_account(OpenAccount::new(self.group, self.user, title, kind, opening))
            .await
            .unwrap()
    }
}

fn money(amount: Decimal, currency: Currency) -> Money {
    Money::new(amount, currency)
}

#[tokio::test]
async fn test_expense_on_checking_account() {
    let h = household();
    let account = h
        .open("Main Account", AccountKind::Checking, money(dec!(1000.00), Currency::Rub))
        .await;
    let groceries = h
        .engine
        .directory()
        .create_category("Groceries", CategoryKind::Expense)
        .unwrap();

    let receipt = h
        .engine
        .post(
            PostingRequest::single(h.user, account.id, money(dec!(-150.50), Currency::Rub))
                .with_category(groceries.id),
        )
        .await
        .unwrap();

    let after = h.engine.account(account.id).unwrap();
    assert_eq!(after.balance.amount, dec!(849.50));
    assert_eq!(after.version, account.version + 1);
    assert_eq!(receipt.entry.amount.amount, dec!(-150.50));
    assert_eq!(receipt.transactions().len(), 1);
    assert_eq!(receipt.transactions()[0].causal_version, account.version);

    let postings: Vec<_> = h
        .engine
        .history(account.id, DateRange::all())
        .unwrap()
        .iter()
        .filter(|t| t.kind == EntryKind::Posting)
        .collect();
    assert_eq!(postings.len(), 1);
    assert_eq!(postings[0].amount.amount, dec!(-150.50));
}

#[tokio::test]
async fn test_transfer_commits_as_one_transaction() {
    let h = household();
    let a = h
        .open("Checking", AccountKind::Checking, money(dec!(50000.00), Currency::Usd))
        .await;
    let b = h
        .open("Savings", AccountKind::Savings, money(dec!(150000.00), Currency::Usd))
        .await;
    let journal_before = h.engine.journal().len();

    let receipt = h
        .engine
        .post(PostingRequest::transfer(
            h.user,
            a.id,
            b.id,
            money(dec!(500.00), Currency::Usd),
        ))
        .await
        .unwrap();

    assert_eq!(h.engine.journal().len(), journal_before + 1);
    assert_eq!(receipt.entry.legs.len(), 2);
    assert_eq!(receipt.entry.amount.amount, dec!(500.00));
    assert_eq!(h.engine.account(a.id).unwrap().balance.amount, dec!(49500.00));
    assert_eq!(h.engine.account(b.id).unwrap().balance.amount, dec!(150500.00));
    assert!(h.engine.reconcile().await.is_consistent());
}

#[tokio::test]
async fn test_savings_overdraft_rejected() {
    let h = household();
    let savings = h
        .open("Savings", AccountKind::Savings, money(dec!(100.00), Currency::Usd))
        .await;

    let err = h
        .engine
        .post(PostingRequest::single(
            h.user,
            savings.id,
            money(dec!(-100.01), Currency::Usd),
        ))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Ledger(LedgerError::InsufficientFunds { .. })
    ));
    assert_eq!(err.error_code(), "INSUFFICIENT_FUNDS");

    let after = h.engine.account(savings.id).unwrap();
    assert_eq!(after.balance, savings.balance);
    assert_eq!(after.version, savings.version);
}

#[tokio::test]
async fn test_overdraft_flag_only_on_checking() {
    let h = household();
    let checking = h
        .engine
        .open_account(
            OpenAccount::new(
                h.group,
                h.user,
                "Everyday",
                AccountKind::Checking,
                money(dec!(10), Currency::Eur),
            )
            .with_overdraft(),
        )
        .await
        .unwrap();
    h.engine
        .post(PostingRequest::single(
            h.user,
            checking.id,
            money(dec!(-25), Currency::Eur),
        ))
        .await
        .unwrap();
    assert_eq!(h.engine.account(checking.id).unwrap().balance.amount, dec!(-15));

    let cash = h
        .engine
        .open_account(
            OpenAccount::new(
                h.group,
                h.user,
                "Wallet",
                AccountKind::Cash,
                money(dec!(10), Currency::Eur),
            )
            .with_overdraft(),
        )
        .await
        .unwrap();
    assert!(!cash.overdraft_allowed);
    assert!(
        h.engine
            .post(PostingRequest::single(h.user, cash.id, money(dec!(-11), Currency::Eur)))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_goal_progress_from_tagged_transactions() {
    let h = household();
    let savings = h
        .open("Savings", AccountKind::Savings, money(dec!(0), Currency::Usd))
        .await;
    let goal = h
        .engine
        .create_goal(NewGoal::new(
            h.group,
            h.user,
            "Vacation in Turkey",
            money(dec!(100000), Currency::Usd),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
        ))
        .unwrap();

    for (amount, month) in [(dec!(15000), 2), (dec!(20000), 3), (dec!(10000), 4)] {
        h.engine
            .post(
                PostingRequest::single(h.user, savings.id, money(amount, Currency::Usd))
                    .with_goal(goal.id)
                    .at(Utc.with_ymd_and_hms(2025, month, 10, 12, 0, 0).unwrap()),
            )
            .await
            .unwrap();
    }

    let progress = h.engine.goal_progress(goal.id).unwrap();
    assert_eq!(progress.current.amount, dec!(45000));
    assert_eq!(progress.pct_complete, dec!(45.00));
    assert_eq!(progress.contributions, 3);
}

#[tokio::test]
async fn test_voided_contribution_leaves_goal() {
    let h = household();
    let savings = h
        .open("Savings", AccountKind::Savings, money(dec!(0), Currency::Usd))
        .await;
    let goal = h
        .engine
        .create_goal(NewGoal::new(
            h.group,
            h.user,
            "Car",
            money(dec!(1000), Currency::Usd),
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2100, 1, 1).unwrap(),
        ))
        .unwrap();

    let receipt = h
        .engine
        .post(
            PostingRequest::single(h.user, savings.id, money(dec!(300), Currency::Usd))
                .with_goal(goal.id),
        )
        .await
        .unwrap();
    assert_eq!(h.engine.goal_progress(goal.id).unwrap().current.amount, dec!(300));

    h.engine.void(receipt.transaction_id(), h.user).await.unwrap();
    assert!(h.engine.goal_progress(goal.id).unwrap().current.is_zero());

    let err = h
        .engine
        .void(receipt.transaction_id(), h.user)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
    assert!(h.engine.account(savings.id).unwrap().balance.is_zero());
}

#[tokio::test]
async fn test_unknown_references() {
    let h = household();
    let err = h
        .engine
        .open_account(OpenAccount::new(
            GroupId::new(),
            h.user,
            "Orphan",
            AccountKind::Cash,
            money(dec!(1), Currency::Usd),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Directory(_)));

    let err = h
        .engine
        .post(PostingRequest::single(
            h.user,
            AccountId::new(),
            money(dec!(1), Currency::Usd),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_notifications_follow_commits() {
    let h = household();
    let account = h
        .open("Main Account", AccountKind::Checking, money(dec!(1000), Currency::Rub))
        .await;
    h.engine
        .post(PostingRequest::single(
            h.user,
            account.id,
            money(dec!(-150.50), Currency::Rub),
        ))
        .await
        .unwrap();

    assert!(h.engine.settle_notifications(Duration::from_secs(2)).await);
    let unread = h.engine.notifications().unread(h.user);
    assert_eq!(unread.len(), 1);
    assert_eq!(
        unread[0].message,
        "A new transaction for 150.50 RUB has been created."
    );
}

#[tokio::test]
async fn test_projections() {
    let h = household();
    let jane = h
        .engine
        .directory()
        .create_user(NewUser::new("jane@example.com", "Jane Doe"))
        .unwrap();
    h.engine
        .directory()
        .add_member(h.group, jane.id, MemberRole::Member)
        .unwrap();
    let salary = h
        .engine
        .directory()
        .create_category("Salary", CategoryKind::Income)
        .unwrap();
    let account = h
        .open("Checking", AccountKind::Checking, money(dec!(100), Currency::Usd))
        .await;
    h.engine
        .post(
            PostingRequest::single(jane.id, account.id, money(dec!(800), Currency::Usd))
                .with_category(salary.id),
        )
        .await
        .unwrap();
    h.engine
        .create_goal(NewGoal::new(
            h.group,
            h.user,
            "Emergency Fund",
            money(dec!(5000), Currency::Usd),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        ))
        .unwrap();

    let overview = h.engine.user_overview(jane.id).unwrap();
    assert_eq!(overview.groups.len(), 1);
    assert_eq!(overview.groups[0].role, MemberRole::Member);
    assert_eq!(overview.transactions.len(), 1);
    assert_eq!(overview.transactions[0].account_title.as_deref(), Some("Checking"));
    assert_eq!(
        overview.transactions[0].category.as_ref().map(|c| c.title.as_str()),
        Some("Salary")
    );
    assert!(overview.accounts.is_empty());

    let owner = h.engine.user_overview(h.user).unwrap();
    assert_eq!(owner.accounts.len(), 1);
    assert_eq!(owner.accounts[0].groups.len(), 1);
    assert_eq!(owner.goals.len(), 1);

    let summary = h.engine.group_summary(h.group).unwrap();
    assert_eq!(summary.counts.members, 2);
    assert_eq!(summary.counts.transactions, 2);
    assert_eq!(summary.counts.goals, 1);
    assert_eq!(summary.members[0].role, MemberRole::Owner);
    assert_eq!(summary.transactions[0].transaction.amount.amount, dec!(800));

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["group"]["name"], "Ivanov Family");
}

/// Store whose balance updates always fail.
#[derive(Default)]
struct FailingCasStore {
    inner: MemoryStore,
    fail_reversal_append: bool,
}

#[async_trait]
impl LedgerStore for FailingCasStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        self.inner.insert_account(account).await
    }

    async fn append(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        if self.fail_reversal_append && matches!(entry.kind, EntryKind::Reversal { .. }) {
            return Err(StoreError::Backend("disk full".to_string()));
        }
        self.inner.append(entry).await
    }

    async fn compare_and_set(&self, updates: &[BalanceUpdate]) -> Result<CasOutcome, StoreError> {
        // Opening balances go through so accounts can be funded.
        if updates.iter().all(|u| u.expected_version == 0) {
            return self.inner.compare_and_set(updates).await;
        }
        Ok(CasOutcome::Conflict {
            account_id: updates[0].account_id,
        })
    }
    async fn load_accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.inner.load_accounts().await
    }

    async fn load_entries(&self) -> Result<Vec<JournalEntry>, StoreError> {
        self.inner.load_entries().await
    }
}

#[tokio::test]
async fn test_failed_balance_update_is_compensated() {
    let h = household_with(Arc::new(FailingCasStore::default()));
    let account = h
        .open("Checking", AccountKind::Checking, money(dec!(100), Currency::Usd))
        .await;

    let err = h
        .engine
        .post(PostingRequest::single(h.user, account.id, money(dec!(-40), Currency::Usd)))
        .await
        .unwrap_err();
    let EngineError::Ledger(LedgerError::PostingFailed {
        transaction_id,
        repaired,
        ..
    }) = &err
    else {
        panic!("expected PostingFailed, got {err:?}");
    };
    assert!(*repaired);
    let transaction_id = *transaction_id;

    let after = h.engine.account(account.id).unwrap();
    assert_eq!(after.balance.amount, dec!(100));
    assert_eq!(after.version, account.version);

    // Original and reversal are both in the journal and cancel out.
    assert!(h.engine.journal().get(transaction_id).is_some());
    assert!(h.engine.journal().is_voided(transaction_id));
    let sum = h.engine.journal().sum_for(account.id, Currency::Usd).unwrap();
    assert_eq!(sum, after.balance);
    assert!(h.engine.reconcile().await.is_consistent());
}

#[tokio::test]
async fn test_unrepaired_compensation_is_reported() {
    let store = FailingCasStore {
        inner: MemoryStore::new(),
        fail_reversal_append: true,
    };
    let h = household_with(Arc::new(store));
    let account = h
        .open("Checking", AccountKind::Checking, money(dec!(100), Currency::Usd))
        .await;

    let err = h
        .engine
        .post(PostingRequest::single(h.user, account.id, money(dec!(-40), Currency::Usd)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Ledger(LedgerError::PostingFailed { repaired: false, .. })
    ));
    assert!(h.engine.reconcile().await.is_consistent());
}

/// Store whose balance updates take a while to land.
struct SlowCasStore {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait]
impl LedgerStore for SlowCasStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        self.inner.insert_account(account).await
    }

    async fn append(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        self.inner.append(entry).await
    }

    async fn compare_and_set(&self, updates: &[BalanceUpdate]) -> Result<CasOutcome, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.compare_and_set(updates).await
    }

    async fn load_accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.inner.load_accounts().await
    }

    async fn load_entries(&self) -> Result<Vec<JournalEntry>, StoreError> {
        self.inner.load_entries().await
    }
}

#[tokio::test]
async fn test_abandoned_post_still_commits_whole() {
    let store = SlowCasStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(300),
    };
    let h = household_with(Arc::new(store));
    let account = h
        .open("Main Account", AccountKind::Checking, money(dec!(1000.00), Currency::Rub))
        .await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        h.engine.post(PostingRequest::single(
            h.user,
            account.id,
            money(dec!(-150.50), Currency::Rub),
        )),
    )
    .await;
    assert!(abandoned.is_err(), "post should still be waiting on the store");

    // The commit keeps the account lock until it has published.
    drop(h.engine.ledger().lock_for(account.id).lock_owned().await);

    let report = h.engine.reconcile().await;
    assert!(report.is_consistent(), "mismatches: {:?}", report.mismatches);
    let after = h.engine.account(account.id).unwrap();
    assert_eq!(after.balance.amount, dec!(849.50));
    assert_eq!(after.version, account.version + 1);
    assert_eq!(h.engine.journal().len(), 2);
}

#[tokio::test]
async fn test_void_after_goal_window_removes_contribution() {
    let h = household();
    let savings = h
        .open("Savings", AccountKind::Savings, money(dec!(0), Currency::Usd))
        .await;
    let goal = h
        .engine
        .create_goal(NewGoal::new(
            h.group,
            h.user,
            "Vacation",
            money(dec!(200000), Currency::Usd),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        ))
        .unwrap();

    let receipt = h
        .engine
        .post(
            PostingRequest::single(h.user, savings.id, money(dec!(15000), Currency::Usd))
                .with_goal(goal.id)
                .at(Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(h.engine.goal_progress(goal.id).unwrap().current.amount, dec!(15000));

    // Voided today, long after the goal's target date.
    h.engine.void(receipt.transaction_id(), h.user).await.unwrap();

    assert!(h.engine.account(savings.id).unwrap().balance.is_zero());
    assert!(h.engine.goal_progress(goal.id).unwrap().current.is_zero());
}

#[tokio::test]
async fn test_restore_continues_from_store() {
    let store = Arc::new(MemoryStore::new());
    let h = household_with(store.clone());
    let checking = h
        .open("Checking", AccountKind::Checking, money(dec!(500), Currency::Usd))
        .await;
    let savings = h
        .open("Savings", AccountKind::Savings, money(dec!(100), Currency::Usd))
        .await;
    h.engine
        .post(PostingRequest::transfer(
            h.user,
            checking.id,
            savings.id,
            money(dec!(200), Currency::Usd),
        ))
        .await
        .unwrap();
    let expense = h
        .engine
        .post(PostingRequest::single(h.user, checking.id, money(dec!(-50), Currency::Usd)))
        .await
        .unwrap();
    let journal_len = h.engine.journal().len();
    drop(h);

    let restored = LedgerEngine::restore(&LedgerConfig::default(), store.clone())
        .await
        .unwrap();
    assert_eq!(restored.journal().len(), journal_len);
    let checking_after = restored.account(checking.id).unwrap();
    assert_eq!(checking_after.balance.amount, dec!(250));
    assert_eq!(checking_after.version, 3);
    assert_eq!(restored.account(savings.id).unwrap().balance.amount, dec!(300));

    // History is indexed again: earlier transactions can be voided once.
    let user = UserId::new();
    let reversal = restored.void(expense.transaction_id(), user).await.unwrap();
    assert_eq!(reversal.offset(), JournalOffset(u64::try_from(journal_len).unwrap()));
    let err = restored.void(expense.transaction_id(), user).await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");

    assert_eq!(restored.account(checking.id).unwrap().balance.amount, dec!(300));
    assert_eq!(store.entry_count(), journal_len + 1);
    assert!(restored.reconcile().await.is_consistent());
}

#[tokio::test]
async fn test_restore_refuses_balance_without_history() {
    let store = Arc::new(MemoryStore::new());
    let account = Account {
        id: AccountId::new(),
        group_id: GroupId::new(),
        owner: UserId::new(),
        title: "Cash".to_string(),
        kind: AccountKind::Cash,
        overdraft_allowed: false,
        balance: Money::zero(Currency::Usd),
        version: 0,
        opened_at: Utc::now(),
    };
    store.insert_account(&account).await.unwrap();
    // A journal leg whose balance update never reached the store.
    store
        .append(&JournalEntry {
            offset: JournalOffset(0),
            transaction_id: TransactionId::new(),
            kind: EntryKind::Posting,
            legs: vec![JournalLeg {
                account_id: account.id,
                amount: money(dec!(10), Currency::Usd),
                causal_version: 0,
            }],
            amount: money(dec!(10), Currency::Usd),
            category_id: None,
            goal_id: None,
            user_id: account.owner,
            timestamp: Utc::now(),
            memo: None,
        })
        .await
        .unwrap();

    let err = LedgerEngine::restore(&LedgerConfig::default(), store)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "RESTORE_FAILED");
}

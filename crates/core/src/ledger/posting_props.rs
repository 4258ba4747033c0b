//! Property-based tests for the posting coordinator.
//!
//! - Property 1: balance equals the sum of the account's journal legs
//! - Property 2: non-overdraft accounts never go negative
//! - Property 3: every committed leg bumps the account version by one

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use rust_decimal::Decimal;
use hearth_shared::types::{Currency, GroupId, Money, UserId};
use tokio_util::sync::CancellationToken;

use super::account::{AccountKind, OpenAccount};
use super::account_ledger::AccountLedger;
use super::events::EventPublisher;
use super::journal::{DateRange, TransactionJournal};
use super::posting::{PostingCoordinator, PostingRequest};
use super::reconcile::reconcile;
use super::store::MemoryStore;

/// One randomly generated operation against a pair of accounts.
#[derive(Debug, Clone)]
enum Op {
    /// Income or expense on account `0` or `1`.
    Single(usize, i64),
    /// Transfer from `from` to the other account.
    Transfer(usize, i64),
    /// Void the n-th successful posting, if any.
    Void(usize),
}

/// Strategy to generate signed amounts in cents (-500.00 to 500.00, never zero).
fn signed_cents() -> impl Strategy<Value = i64> {
    prop_oneof![(1i64..50_000i64), (-50_000i64..-1i64)]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..2, signed_cents()).prop_map(|(i, c)| Op::Single(i, c)),
        (0usize..2, 1i64..50_000i64).prop_map(|(i, c)| Op::Transfer(i, c)),
        (0usize..16).prop_map(Op::Void),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn usd_cents(cents: i64) -> Money {
    Money::new(Decimal::new(cents, 2), Currency::Usd)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property 1 + 2 + 3 over arbitrary operation sequences.
    ///
    /// *For any* sequence of postings, transfers and voids, each account's
    /// balance SHALL equal its journal sum, savings SHALL never be negative,
    /// and the version SHALL equal the number of applied legs.
    #[test]
    fn prop_ledger_matches_journal(
        opening in (0i64..100_000i64, 0i64..100_000i64),
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        runtime().block_on(async move {
            let coordinator = PostingCoordinator::new(
                Arc::new(AccountLedger::new()),
                Arc::new(TransactionJournal::new()),
                Arc::new(MemoryStore::new()),
                EventPublisher::disabled(),
                Duration::from_secs(1),
            );
            let user = UserId::new();
            let group = GroupId::new();
            let cancel = CancellationToken::new();

            let checking = coordinator
                .open_account(
                    OpenAccount::new(group, user, "Checking", AccountKind::Checking, usd_cents(opening.0))
                        .with_overdraft(),
                )
                .await
                .unwrap();
            let savings = coordinator
                .open_account(OpenAccount::new(group, user, "Savings", AccountKind::Savings, usd_cents(opening.1)))
                .await
                .unwrap();
            let ids = [checking.id, savings.id];

            let mut committed = Vec::new();
            for op in ops {
                let result = match op {
                    Op::Single(i, cents) => {
                        coordinator.post(PostingRequest::single(user, ids[i], usd_cents(cents)), &cancel).await
                    }
                    Op::Transfer(i, cents) => {
                        coordinator
                            .post(PostingRequest::transfer(user, ids[i], ids[1 - i], usd_cents(cents)), &cancel)
                            .await
                    }
                    Op::Void(n) => match committed.get(n) {
                        Some(id) => coordinator.void(*id, user, chrono::Utc::now(), &cancel).await,
                        None => continue,
                    },
                };
                if let Ok(receipt) = result {
                    committed.push(receipt.transaction_id());
                }
            }

            let report = reconcile(coordinator.ledger(), coordinator.journal()).await;
            prop_assert!(report.is_consistent(), "mismatches: {:?}", report.mismatches);

            for id in ids {
                let account = coordinator.ledger().get(id).unwrap();
                let sum = coordinator.journal().sum_for(id, Currency::Usd).unwrap();
                prop_assert_eq!(account.balance, sum);

                let legs = coordinator.journal().entries_for(id, DateRange::all()).len();
                prop_assert_eq!(account.version, u64::try_from(legs).unwrap());
            }
            let savings = coordinator.ledger().get(savings.id).unwrap();
            prop_assert!(!savings.balance.is_negative());
            Ok(())
        })?;
    }

    /// Rejected postings leave no trace.
    ///
    /// *For any* expense larger than a savings balance, the posting SHALL fail
    /// with `InsufficientFunds` and balance, version and journal SHALL be unchanged.
    #[test]
    fn prop_overdraft_has_no_side_effects(
        balance in 0i64..1_000_000i64,
        excess in 1i64..1_000_000i64,
    ) {
        runtime().block_on(async move {
            let coordinator = PostingCoordinator::new(
                Arc::new(AccountLedger::new()),
                Arc::new(TransactionJournal::new()),
                Arc::new(MemoryStore::new()),
                EventPublisher::disabled(),
                Duration::from_secs(1),
            );
            let user = UserId::new();
            let savings = coordinator
                .open_account(OpenAccount::new(GroupId::new(), user, "Savings", AccountKind::Savings, usd_cents(balance)))
                .await
                .unwrap();
            let journal_len = coordinator.journal().len();

            let result = coordinator
                .post(
                    PostingRequest::single(user, savings.id, usd_cents(-(balance + excess))),
                    &CancellationToken::new(),
                )
                .await;
            prop_assert!(
                matches!(result, Err(super::error::LedgerError::InsufficientFunds { .. })),
                "expected InsufficientFunds, got {:?}",
                result
            );

            let after = coordinator.ledger().get(savings.id).unwrap();
            prop_assert_eq!(after.balance, savings.balance);
            prop_assert_eq!(after.version, savings.version);
            prop_assert_eq!(coordinator.journal().len(), journal_len);
            Ok(())
        })?;
    }
}

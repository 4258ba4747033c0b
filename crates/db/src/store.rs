//! PostgreSQL implementation of the ledger persistence boundary.
//!
//! Journal appends and balance updates each run in one database transaction.
//! Balance rows are guarded by their version column, so a row that moved on
//! makes the whole batch roll back. Legs keep their position so entries load
//! back exactly as they were appended.

use async_trait::async_trait;
use chrono::Utc;
use hearth_core::ledger::{
    Account, BalanceUpdate, CasOutcome, EntryKind, JournalEntry, JournalLeg, JournalOffset,
    LedgerStore, StoreError,
};
use hearth_shared::types::{
    AccountId, CategoryId, GoalId, GroupId, Money, TransactionId, UserId,
};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};

use crate::convert;
use crate::entities::sea_orm_active_enums as db;
use crate::entities::{accounts, journal_entries, journal_legs};

/// Durable [`LedgerStore`] backed by PostgreSQL through `SeaORM`.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    db: DatabaseConnection,
}

impl PgLedgerStore {
    /// Creates a store over an open connection pool.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Persisted (version, balance) of an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row is corrupt.
    pub async fn account_row(&self, account_id: AccountId) -> Result<Option<(u64, Money)>, StoreError> {
        let Some(row) = accounts::Entity::find_by_id(account_id.into_inner())
            .one(&self.db)
            .await
            .map_err(store_error)?
        else {
            return Ok(None);
        };

        let version = to_u64(row.version, "account version")?;
        let balance = convert::money(row.balance, &row.currency).ok_or_else(|| {
            StoreError::Backend(format!("unknown currency {} on account {account_id}", row.currency))
        })?;
        Ok(Some((version, balance)))
    }

    /// Number of persisted journal entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn entry_count(&self) -> Result<u64, StoreError> {
        journal_entries::Entity::find()
            .count(&self.db)
            .await
            .map_err(store_error)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let model = accounts::ActiveModel {
            id: Set(account.id.into_inner()),
            group_id: Set(account.group_id.into_inner()),
            owner_id: Set(account.owner.into_inner()),
            title: Set(account.title.clone()),
            kind: Set(account.kind.into()),
            currency: Set(account.currency().to_string()),
            overdraft_allowed: Set(account.overdraft_allowed),
            balance: Set(account.balance.amount),
            version: Set(to_i64(account.version, "account version")?),
            opened_at: Set(account.opened_at.into()),
        };
        model.insert(&self.db).await.map_err(store_error)?;

        tracing::debug!(account_id = %account.id, "Account row inserted");
        Ok(())
    }

    async fn append(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        let offset = to_i64(entry.offset.value(), "journal offset")?;
        let reverses = match entry.kind {
            EntryKind::Reversal { reverses } => Some(reverses.into_inner()),
            EntryKind::Opening | EntryKind::Posting => None,
        };

        let header = journal_entries::ActiveModel {
            offset: Set(offset),
            transaction_id: Set(entry.transaction_id.into_inner()),
            kind: Set(entry.kind.into()),
            reverses: Set(reverses),
            amount: Set(entry.amount.amount),
            currency: Set(entry.amount.currency.to_string()),
            category_id: Set(entry.category_id.map(Into::into)),
            goal_id: Set(entry.goal_id.map(Into::into)),
            user_id: Set(entry.user_id.into_inner()),
            occurred_at: Set(entry.timestamp.into()),
            memo: Set(entry.memo.clone()),
        };

        let legs = entry
            .legs
            .iter()
            .enumerate()
            .map(|(position, leg)| {
                Ok(journal_legs::ActiveModel {
                    entry_offset: Set(offset),
                    account_id: Set(leg.account_id.into_inner()),
                    amount: Set(leg.amount.amount),
                    causal_version: Set(to_i64(leg.causal_version, "causal version")?),
                    position: Set(i32::try_from(position).map_err(|_| {
                        StoreError::Backend(format!("entry {offset} has too many legs"))
                    })?),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        // Entry and legs land together or not at all
        let txn = self.db.begin().await.map_err(store_error)?;
        header.insert(&txn).await.map_err(store_error)?;
        journal_legs::Entity::insert_many(legs)
            .exec(&txn)
            .await
            .map_err(store_error)?;
        txn.commit().await.map_err(store_error)?;

        tracing::debug!(
            offset = entry.offset.value(),
            transaction_id = %entry.transaction_id,
            kind = entry.kind.as_str(),
            "Journal entry persisted"
        );
        Ok(())
    }

    async fn compare_and_set(&self, updates: &[BalanceUpdate]) -> Result<CasOutcome, StoreError> {
        let txn = self.db.begin().await.map_err(store_error)?;

        for update in updates {
            let account_id = update.account_id.into_inner();
            let result = accounts::Entity::update_many()
                .col_expr(accounts::Column::Balance, Expr::value(update.balance.amount))
                .col_expr(
                    accounts::Column::Version,
                    Expr::value(to_i64(update.new_version, "account version")?),
                )
                .filter(accounts::Column::Id.eq(account_id))
                .filter(accounts::Column::Version.eq(to_i64(update.expected_version, "account version")?))
                .exec(&txn)
                .await
                .map_err(store_error)?;

            if result.rows_affected != 1 {
                txn.rollback().await.map_err(store_error)?;

                let exists = accounts::Entity::find_by_id(account_id)
                    .count(&self.db)
                    .await
                    .map_err(store_error)?;
                if exists == 0 {
                    return Err(StoreError::Missing(format!("account {}", update.account_id)));
                }

                tracing::debug!(
                    account_id = %update.account_id,
                    expected_version = update.expected_version,
                    "Balance row version moved on"
                );
                return Ok(CasOutcome::Conflict {
                    account_id: update.account_id,
                });
            }
        }

        txn.commit().await.map_err(store_error)?;
        Ok(CasOutcome::Applied)
    }

    async fn load_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows = accounts::Entity::find()
            .order_by_asc(accounts::Column::OpenedAt)
            .order_by_asc(accounts::Column::Id)
            .all(&self.db)
            .await
            .map_err(store_error)?;

        let accounts = rows
            .into_iter()
            .map(account_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(accounts = accounts.len(), "Account rows loaded");
        Ok(accounts)
    }

    async fn load_entries(&self) -> Result<Vec<JournalEntry>, StoreError> {
        let rows = journal_entries::Entity::find()
            .order_by_asc(journal_entries::Column::Offset)
            .find_with_related(journal_legs::Entity)
            .all(&self.db)
            .await
            .map_err(store_error)?;

        let entries = rows
            .into_iter()
            .map(|(header, legs)| entry_from_rows(header, legs))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(entries = entries.len(), "Journal entries loaded");
        Ok(entries)
    }
}

fn account_from_row(row: accounts::Model) -> Result<Account, StoreError> {
    let id = AccountId::from_uuid(row.id);
    let balance = convert::money(row.balance, &row.currency).ok_or_else(|| {
        StoreError::Backend(format!("unknown currency {} on account {id}", row.currency))
    })?;
    Ok(Account {
        id,
        group_id: GroupId::from_uuid(row.group_id),
        owner: UserId::from_uuid(row.owner_id),
        title: row.title,
        kind: row.kind.into(),
        overdraft_allowed: row.overdraft_allowed,
        balance,
        version: to_u64(row.version, "account version")?,
        opened_at: row.opened_at.with_timezone(&Utc),
    })
}

fn entry_from_rows(
    header: journal_entries::Model,
    mut legs: Vec<journal_legs::Model>,
) -> Result<JournalEntry, StoreError> {
    let offset = JournalOffset(to_u64(header.offset, "journal offset")?);
    let amount = convert::money(header.amount, &header.currency).ok_or_else(|| {
        StoreError::Backend(format!("unknown currency {} on entry {offset}", header.currency))
    })?;
    let kind = match (header.kind, header.reverses) {
        (db::EntryKind::Opening, _) => EntryKind::Opening,
        (db::EntryKind::Posting, _) => EntryKind::Posting,
        (db::EntryKind::Reversal, Some(reverses)) => EntryKind::Reversal {
            reverses: TransactionId::from_uuid(reverses),
        },
        (db::EntryKind::Reversal, None) => {
            return Err(StoreError::Backend(format!(
                "reversal entry {offset} has no reversed transaction"
            )));
        }
    };

    legs.sort_by_key(|leg| leg.position);
    let legs = legs
        .into_iter()
        .map(|leg| {
            Ok(JournalLeg {
                account_id: AccountId::from_uuid(leg.account_id),
                amount: Money::new(leg.amount, amount.currency),
                causal_version: to_u64(leg.causal_version, "causal version")?,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    Ok(JournalEntry {
        offset,
        transaction_id: TransactionId::from_uuid(header.transaction_id),
        kind,
        legs,
        amount,
        category_id: header.category_id.map(CategoryId::from_uuid),
        goal_id: header.goal_id.map(GoalId::from_uuid),
        user_id: UserId::from_uuid(header.user_id),
        timestamp: header.occurred_at.with_timezone(&Utc),
        memo: header.memo,
    })
}

fn to_i64(value: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Backend(format!("{what} {value} out of range")))
}

fn to_u64(value: i64, what: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Backend(format!("negative {what} {value}")))
}

fn store_error(err: DbErr) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => StoreError::Duplicate(detail),
        Some(SqlErr::ForeignKeyConstraintViolation(detail)) => StoreError::Missing(detail),
        _ => StoreError::Backend(err.to_string()),
    }
}

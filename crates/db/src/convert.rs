//! Conversions between engine types and database enums.

use hearth_core::directory::{CategoryKind, MemberRole, UserRole};
use hearth_core::ledger::{AccountKind, EntryKind};
use hearth_core::notification::NotificationKind;
use hearth_shared::types::{Currency, Money};
use rust_decimal::Decimal;

use crate::entities::sea_orm_active_enums as db;

impl From<UserRole> for db::UserRole {
    fn from(role: UserRole) -> Self {
        match role {
            UserRole::Admin => Self::Admin,
            UserRole::User => Self::User,
        }
    }
}

impl From<db::UserRole> for UserRole {
    fn from(role: db::UserRole) -> Self {
        match role {
            db::UserRole::Admin => Self::Admin,
            db::UserRole::User => Self::User,
        }
    }
}

impl From<MemberRole> for db::MemberRole {
    fn from(role: MemberRole) -> Self {
        match role {
            MemberRole::Owner => Self::Owner,
            MemberRole::Member => Self::Member,
        }
    }
}

impl From<db::MemberRole> for MemberRole {
    fn from(role: db::MemberRole) -> Self {
        match role {
            db::MemberRole::Owner => Self::Owner,
            db::MemberRole::Member => Self::Member,
        }
    }
}

impl From<CategoryKind> for db::CategoryKind {
    fn from(kind: CategoryKind) -> Self {
        match kind {
            CategoryKind::Income => Self::Income,
            CategoryKind::Expense => Self::Expense,
        }
    }
}

impl From<AccountKind> for db::AccountKind {
    fn from(kind: AccountKind) -> Self {
        match kind {
            AccountKind::Checking => Self::Checking,
            AccountKind::Savings => Self::Savings,
            AccountKind::Cash => Self::Cash,
        }
    }
}

impl From<db::AccountKind> for AccountKind {
    fn from(kind: db::AccountKind) -> Self {
        match kind {
            db::AccountKind::Checking => Self::Checking,
            db::AccountKind::Savings => Self::Savings,
            db::AccountKind::Cash => Self::Cash,
        }
    }
}

impl From<EntryKind> for db::EntryKind {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::Opening => Self::Opening,
            EntryKind::Posting => Self::Posting,
            EntryKind::Reversal { .. } => Self::Reversal,
        }
    }
}

impl From<NotificationKind> for db::NotificationKind {
    fn from(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Transaction => Self::Transaction,
            NotificationKind::Income => Self::Income,
        }
    }
}

/// Rebuilds `Money` from a stored amount and currency code.
///
/// Returns `None` for an unknown currency code.
pub(crate) fn money(amount: Decimal, currency: &str) -> Option<Money> {
    currency
        .parse::<Currency>()
        .ok()
        .map(|currency| Money::new(amount, currency))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_entry_kind_drops_reversal_target() {
        let kind = EntryKind::Reversal {
            reverses: hearth_shared::types::TransactionId::new(),
        };
        assert_eq!(db::EntryKind::from(kind), db::EntryKind::Reversal);
        assert_eq!(db::EntryKind::from(EntryKind::Opening), db::EntryKind::Opening);
    }

    #[test]
    fn test_roles_round_trip() {
        for role in [UserRole::Admin, UserRole::User] {
            assert_eq!(UserRole::from(db::UserRole::from(role)), role);
        }
        for role in [MemberRole::Owner, MemberRole::Member] {
            assert_eq!(MemberRole::from(db::MemberRole::from(role)), role);
        }
    }

    #[test]
    fn test_account_kinds_round_trip() {
        for kind in [AccountKind::Checking, AccountKind::Savings, AccountKind::Cash] {
            assert_eq!(AccountKind::from(db::AccountKind::from(kind)), kind);
        }
    }

    #[test]
    fn test_money_from_stored_columns() {
        let stored = money(dec!(150.5000), "RUB").unwrap();
        assert_eq!(stored, Money::new(dec!(150.50), Currency::Rub));
        assert!(money(dec!(1), "XXX").is_none());
    }
}

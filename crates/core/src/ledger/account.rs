//! Money accounts and their balance policy.

use chrono::{DateTime, Utc};
use hearth_shared::types::{AccountId, Currency, GroupId, Money, UserId};
use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// Kind of money account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Everyday account; may be overdrawn when explicitly allowed.
    Checking,
    /// Savings account; never negative.
    Savings,
    /// Cash wallet; never negative.
    Cash,
}

impl AccountKind {
    /// Whether this kind of account can carry an overdraft at all.
    #[must_use]
    pub const fn supports_overdraft(self) -> bool {
        matches!(self, Self::Checking)
    }
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Checking => write!(f, "checking"),
            Self::Savings => write!(f, "savings"),
            Self::Cash => write!(f, "cash"),
        }
    }
}

impl std::str::FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "checking" => Ok(Self::Checking),
            "savings" => Ok(Self::Savings),
            "cash" => Ok(Self::Cash),
            _ => Err(format!("Unknown account kind: {s}")),
        }
    }
}

/// Committed state of one account.
///
/// `balance` always equals the signed sum of the account's journal legs and
/// `version` grows by one with every applied leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier.
    pub id: AccountId,
    /// Household group the account was opened in.
    pub group_id: GroupId,
    /// User who owns the account.
    pub owner: UserId,
    /// Display title.
    pub title: String,
    /// Account kind.
    pub kind: AccountKind,
    /// Overdraft flag; only meaningful for checking accounts.
    pub overdraft_allowed: bool,
    /// Current balance.
    pub balance: Money,
    /// Optimistic concurrency token.
    pub version: u64,
    /// When the account was opened.
    pub opened_at: DateTime<Utc>,
}

impl Account {
    /// The account's currency.
    #[must_use]
    pub const fn currency(&self) -> Currency {
        self.balance.currency
    }

    /// Whether the balance may drop below zero.
    #[must_use]
    pub const fn may_go_negative(&self) -> bool {
        self.kind.supports_overdraft() && self.overdraft_allowed
    }

    /// Checks the non-negative balance policy for a prospective balance.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientFunds` if the account would go negative without
    /// an overdraft.
    pub fn check_policy(&self, new_balance: &Money, requested: &Money) -> Result<(), LedgerError> {
        if new_balance.is_negative() && !self.may_go_negative() {
            return Err(LedgerError::InsufficientFunds {
                account_id: self.id,
                balance: self.balance,
                requested: *requested,
            });
        }
        Ok(())
    }
}

/// Input for opening an account.
#[derive(Debug, Clone)]
pub struct OpenAccount {
    /// Group the account belongs to.
    pub group_id: GroupId,
    /// Owning user.
    pub owner: UserId,
    /// Display title.
    pub title: String,
    /// Account kind.
    pub kind: AccountKind,
    /// Opening balance; its currency becomes the account currency.
    pub opening_balance: Money,
    /// Overdraft flag.
    pub overdraft_allowed: bool,
    /// Opening timestamp.
    pub opened_at: DateTime<Utc>,
}

impl OpenAccount {
    /// Creates an input without overdraft, opened now.
    #[must_use]
    pub fn new(
        group_id: GroupId,
        owner: UserId,
        title: impl Into<String>,
        kind: AccountKind,
        opening_balance: Money,
    ) -> Self {
        Self {
            group_id,
            owner,
            title: title.into(),
            kind,
            opening_balance,
            overdraft_allowed: false,
            opened_at: Utc::now(),
        }
    }

    /// Allows the account to be overdrawn (checking accounts only).
    #[must_use]
    pub fn with_overdraft(mut self) -> Self {
        self.overdraft_allowed = true;
        self
    }

    /// Sets the opening timestamp.
    #[must_use]
    pub fn opened_at(mut self, at: DateTime<Utc>) -> Self {
        self.opened_at = at;
        self
    }
}

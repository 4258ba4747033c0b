//! Ledger error types for validation, concurrency and post-commit errors.
//!
//! Every variant names the invariant it protects. Validation errors are
//! returned before any side effect; `VersionConflict` and `LockTimeout` are
//! retryable by the caller; `PostingFailed` means a journal append had to be
//! compensated and needs operator attention.

use hearth_shared::AppError;
use hearth_shared::types::{AccountId, Currency, GoalId, Money, MoneyError, TransactionId};
use thiserror::Error;

use super::store::StoreError;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// A posting must touch at least one account.
    #[error("Posting must have at least one leg")]
    EmptyPosting,

    /// Leg amount cannot be zero.
    #[error("Leg amount for account {0} cannot be zero")]
    ZeroAmount(AccountId),

    /// The same account appears in two legs of one posting.
    #[error("Account {0} appears in more than one leg")]
    DuplicateLeg(AccountId),

    /// Legs of a multi-leg posting do not net to zero.
    #[error("Transfer legs do not net to zero, residual {residual}")]
    UnbalancedTransfer {
        /// Sum of all legs.
        residual: Money,
    },

    /// Arithmetic between different currencies.
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch {
        /// The currency the operation required.
        expected: Currency,
        /// The currency that was supplied.
        actual: Currency,
    },

    /// Amount outside the representable range.
    #[error("Money arithmetic overflow")]
    Overflow,

    /// Account may not go negative.
    #[error("Insufficient funds in account {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// The account ID.
        account_id: AccountId,
        /// Balance before the rejected change.
        balance: Money,
        /// The rejected signed change.
        requested: Money,
    },

    /// Account ID already present in the ledger.
    #[error("Account already exists: {0}")]
    DuplicateAccount(AccountId),

    /// Goal definition is invalid.
    #[error("Invalid goal: {0}")]
    InvalidGoal(String),

    /// Reversal entries are final.
    #[error("Reversal entry {0} cannot be voided")]
    CannotVoidReversal(TransactionId),

    /// Request was cancelled before its accounts were reserved.
    #[error("Posting cancelled before reservation")]
    Cancelled,

    // ========== Not Found Errors ==========
    /// Account not found.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Transaction not found, or already voided.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Goal not found.
    #[error("Goal not found: {0}")]
    GoalNotFound(GoalId),

    // ========== Concurrency Errors ==========
    /// Account version mismatch.
    #[error("Version conflict for account {account_id}: expected {expected}, got {actual}")]
    VersionConflict {
        /// The account ID.
        account_id: AccountId,
        /// The version the caller last observed.
        expected: u64,
        /// The current version.
        actual: u64,
    },

    /// A bounded lock wait expired; every lock taken so far was released.
    #[error("Timed out after {waited_ms} ms waiting for {resource}")]
    LockTimeout {
        /// What the request was waiting for.
        resource: String,
        /// Configured wait bound in milliseconds.
        waited_ms: u64,
    },

    // ========== Post-commit Errors ==========
    /// Ledger mutation failed after the journal append.
    #[error("Posting {transaction_id} failed after journal append: {reason}")]
    PostingFailed {
        /// The compensated transaction.
        transaction_id: TransactionId,
        /// Why the ledger mutation failed.
        reason: String,
        /// Whether the compensating reversal reached durable storage.
        repaired: bool,
    },

    /// The detached commit task panicked or was aborted.
    #[error("Commit of {transaction_id} did not complete: {reason}")]
    CommitAborted {
        /// The transaction being committed.
        transaction_id: TransactionId,
        /// Join failure reported by the runtime.
        reason: String,
    },

    // ========== Storage Errors ==========
    /// Persisted state could not be loaded back.
    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    /// Persistence boundary error.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl LedgerError {
    /// Returns the error code naming the violated invariant.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyPosting => "EMPTY_POSTING",
            Self::ZeroAmount(_) => "ZERO_AMOUNT",
            Self::DuplicateLeg(_) => "DUPLICATE_LEG",
            Self::UnbalancedTransfer { .. } => "UNBALANCED_TRANSFER",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::Overflow => "OVERFLOW",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::DuplicateAccount(_) => "DUPLICATE_ACCOUNT",
            Self::InvalidGoal(_) => "INVALID_GOAL",
            Self::CannotVoidReversal(_) => "CANNOT_VOID_REVERSAL",
            Self::Cancelled => "CANCELLED",
            Self::AccountNotFound(_) | Self::TransactionNotFound(_) | Self::GoalNotFound(_) => {
                "NOT_FOUND"
            }
            Self::VersionConflict { .. } => "VERSION_CONFLICT",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::PostingFailed { .. } => "POSTING_FAILED",
            Self::CommitAborted { .. } => "COMMIT_ABORTED",
            Self::RestoreFailed(_) => "RESTORE_FAILED",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Returns true if the caller may retry. The engine never retries itself.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::LockTimeout { .. })
    }

    /// Returns true for the `NotFound` family.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::AccountNotFound(_) | Self::TransactionNotFound(_) | Self::GoalNotFound(_)
        )
    }
}

impl From<MoneyError> for LedgerError {
    fn from(err: MoneyError) -> Self {
        match err {
            MoneyError::CurrencyMismatch { expected, actual } => {
                Self::CurrencyMismatch { expected, actual }
            }
            MoneyError::Overflow => Self::Overflow,
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = format!("[{}] {err}", err.error_code());
        match err {
            LedgerError::AccountNotFound(_)
            | LedgerError::TransactionNotFound(_)
            | LedgerError::GoalNotFound(_) => Self::NotFound(message),
            LedgerError::EmptyPosting
            | LedgerError::ZeroAmount(_)
            | LedgerError::DuplicateLeg(_)
            | LedgerError::UnbalancedTransfer { .. }
            | LedgerError::CurrencyMismatch { .. }
            | LedgerError::Overflow
            | LedgerError::InvalidGoal(_)
            | LedgerError::Cancelled => Self::Validation(message),
            LedgerError::InsufficientFunds { .. } | LedgerError::CannotVoidReversal(_) => {
                Self::BusinessRule(message)
            }
            LedgerError::VersionConflict { .. } | LedgerError::DuplicateAccount(_) => {
                Self::Conflict(message)
            }
            LedgerError::LockTimeout { .. } => Self::Unavailable(message),
            LedgerError::Storage(_) | LedgerError::RestoreFailed(_) => Self::Storage(message),
            LedgerError::PostingFailed { .. } | LedgerError::CommitAborted { .. } => {
                Self::Internal(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::EmptyPosting.error_code(), "EMPTY_POSTING");
        assert_eq!(
            LedgerError::InsufficientFunds {
                account_id: AccountId::new(),
                balance: Money::new(dec!(10), Currency::Usd),
                requested: Money::new(dec!(-20), Currency::Usd),
            }
            .error_code(),
            "INSUFFICIENT_FUNDS"
        );
        assert_eq!(
            LedgerError::TransactionNotFound(TransactionId::new()).error_code(),
            "NOT_FOUND"
        );
        assert_eq!(
            LedgerError::LockTimeout {
                resource: "journal writer".to_string(),
                waited_ms: 10,
            }
            .error_code(),
            "LOCK_TIMEOUT"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(
            LedgerError::VersionConflict {
                account_id: AccountId::new(),
                expected: 1,
                actual: 2,
            }
            .is_retryable()
        );
        assert!(
            LedgerError::LockTimeout {
                resource: String::new(),
                waited_ms: 1,
            }
            .is_retryable()
        );
        assert!(!LedgerError::EmptyPosting.is_retryable());
        assert!(
            !LedgerError::PostingFailed {
                transaction_id: TransactionId::new(),
                reason: String::new(),
                repaired: true,
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_money_error_conversion() {
        let err: LedgerError = MoneyError::CurrencyMismatch {
            expected: Currency::Usd,
            actual: Currency::Rub,
        }
        .into();
        assert!(matches!(
            err,
            LedgerError::CurrencyMismatch {
                expected: Currency::Usd,
                actual: Currency::Rub
            }
        ));
    }

    #[test]
    fn test_app_error_mapping() {
        let app: AppError = LedgerError::GoalNotFound(GoalId::new()).into();
        assert_eq!(app.error_code(), "NOT_FOUND");

        let app: AppError = LedgerError::VersionConflict {
            account_id: AccountId::new(),
            expected: 3,
            actual: 4,
        }
        .into();
        assert!(app.is_retryable());
        assert!(app.to_string().contains("VERSION_CONFLICT"));
    }

    #[test]
    fn test_error_display() {
        let account_id = AccountId::new();
        let err = LedgerError::InsufficientFunds {
            account_id,
            balance: Money::new(dec!(100), Currency::Usd),
            requested: Money::new(dec!(-150.5), Currency::Usd),
        };
        assert_eq!(
            err.to_string(),
            format!(
                "Insufficient funds in account {account_id}: balance 100.00 USD, requested -150.50 USD"
            )
        );
    }
}

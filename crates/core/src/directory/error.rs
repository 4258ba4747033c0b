//! Directory error types.

use hearth_shared::AppError;
use hearth_shared::types::{AccountId, CategoryId, GroupId, UserId};
use thiserror::Error;

/// Errors raised by the user, group and category directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Email address is malformed.
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    /// A required field is empty.
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    /// Email already registered (case-insensitive).
    #[error("Email already registered: {0}")]
    DuplicateEmail(String),

    /// User not found.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// Group not found.
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    /// Category not found.
    #[error("Category not found: {0}")]
    CategoryNotFound(CategoryId),

    /// User already belongs to the group.
    #[error("User {user_id} is already a member of group {group_id}")]
    AlreadyMember {
        /// The user ID.
        user_id: UserId,
        /// The group ID.
        group_id: GroupId,
    },

    /// Groups have exactly one owner.
    #[error("Group {0} already has an owner")]
    OwnerExists(GroupId),

    /// Account already linked to the group.
    #[error("Account {account_id} is already linked to group {group_id}")]
    AlreadyLinked {
        /// The account ID.
        account_id: AccountId,
        /// The group ID.
        group_id: GroupId,
    },
}

impl DirectoryError {
    /// Returns the error code naming the violated rule.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidEmail(_) => "INVALID_EMAIL",
            Self::EmptyField(_) => "EMPTY_FIELD",
            Self::DuplicateEmail(_) => "DUPLICATE_EMAIL",
            Self::UserNotFound(_) | Self::GroupNotFound(_) | Self::CategoryNotFound(_) => {
                "NOT_FOUND"
            }
            Self::AlreadyMember { .. } => "ALREADY_MEMBER",
            Self::OwnerExists(_) => "OWNER_EXISTS",
            Self::AlreadyLinked { .. } => "ALREADY_LINKED",
        }
    }
}

impl From<DirectoryError> for AppError {
    fn from(err: DirectoryError) -> Self {
        let message = format!("[{}] {err}", err.error_code());
        match err {
            DirectoryError::InvalidEmail(_) | DirectoryError::EmptyField(_) => {
                Self::Validation(message)
            }
            DirectoryError::UserNotFound(_)
            | DirectoryError::GroupNotFound(_)
            | DirectoryError::CategoryNotFound(_) => Self::NotFound(message),
            DirectoryError::DuplicateEmail(_)
            | DirectoryError::AlreadyMember { .. }
            | DirectoryError::AlreadyLinked { .. } => Self::Conflict(message),
            DirectoryError::OwnerExists(_) => Self::BusinessRule(message),
        }
    }
}

//! Users, household groups, account links and categories.

pub mod error;
pub mod service;
pub mod types;

pub use error::DirectoryError;
pub use service::Directory;
pub use types::{Category, CategoryKind, Group, MemberRole, Membership, NewUser, User, UserRole};

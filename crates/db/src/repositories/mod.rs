//! Repository abstractions for data access.
//!
//! Repositories persist the directory, goal definitions and notifications.
//! Accounts and the journal are written by [`crate::PgLedgerStore`] only.

pub mod directory;
pub mod goal;
pub mod notification;

pub use directory::DirectoryRepository;
pub use goal::GoalRepository;
pub use notification::NotificationRepository;

//! Core ledger engine for Hearth.
//!
//! This crate contains the household ledger with ZERO web or database
//! dependencies. Durable storage plugs in through [`ledger::LedgerStore`].
//!
//! # Modules
//!
//! - `ledger` - Accounts, journal, posting coordinator, reconciliation
//! - `goal` - Savings goals with journal-derived progress
//! - `directory` - Users, groups, account links and categories
//! - `notification` - Per-user notifications fed by posting events
//! - `projection` - Read models for users and groups
//! - `engine` - The facade tying everything together

pub mod directory;
pub mod engine;
pub mod goal;
pub mod ledger;
pub mod notification;
pub mod projection;

pub use engine::{EngineError, EngineResult, LedgerEngine};

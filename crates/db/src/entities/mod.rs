//! `SeaORM` entity definitions.

pub mod prelude;

pub mod accounts;
pub mod accounts_groups;
pub mod categories;
pub mod goals;
pub mod groups;
pub mod journal_entries;
pub mod journal_legs;
pub mod notifications;
pub mod sea_orm_active_enums;
pub mod user_groups;
pub mod users;

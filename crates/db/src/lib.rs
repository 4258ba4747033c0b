//! Database layer with `SeaORM` entities and repositories.
//!
//! This crate provides:
//! - `SeaORM` entity definitions
//! - Database migrations
//! - [`PgLedgerStore`], the durable ledger persistence boundary
//! - Repositories for the directory, goals and notifications
//! - [`DatabaseStats`] for connection checks

mod convert;
pub mod entities;
pub mod migration;
pub mod repositories;
pub mod stats;
pub mod store;

pub use repositories::{DirectoryRepository, GoalRepository, NotificationRepository};
pub use stats::DatabaseStats;
pub use store::PgLedgerStore;

use hearth_shared::config::DatabaseConfig;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

/// Establishes a pooled connection to the database.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .sqlx_logging(false);

    let db = Database::connect(options).await?;
    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connected"
    );
    Ok(db)
}

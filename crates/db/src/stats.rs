//! Database statistics for connection checks.

use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, FromQueryResult, Statement};
use serde::Serialize;

/// Tables created by the initial migration, in dependency order.
pub const TABLES: [&str; 10] = [
    "users",
    "groups",
    "user_groups",
    "categories",
    "accounts",
    "accounts_groups",
    "goals",
    "journal_entries",
    "journal_legs",
    "notifications",
];

/// Row count of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStat {
    /// Table name.
    pub table: &'static str,
    /// Number of rows.
    pub rows: i64,
}

/// An applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromQueryResult)]
pub struct AppliedMigration {
    /// Migration name.
    pub version: String,
    /// Unix timestamp of application.
    pub applied_at: i64,
}

/// Snapshot of server and schema state.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    /// `SELECT version()` output.
    pub server_version: String,
    /// Row counts per table.
    pub tables: Vec<TableStat>,
    /// Applied migrations, newest first.
    pub migrations: Vec<AppliedMigration>,
}

#[derive(Debug, FromQueryResult)]
struct VersionRow {
    version: String,
}

#[derive(Debug, FromQueryResult)]
struct CountRow {
    count: i64,
}

impl DatabaseStats {
    /// Collects statistics from a live connection.
    ///
    /// # Errors
    ///
    /// Returns an error if any query fails, e.g. when migrations have not
    /// been applied yet.
    pub async fn collect(db: &DatabaseConnection) -> Result<Self, DbErr> {
        let backend = db.get_database_backend();

        let server_version = VersionRow::find_by_statement(Statement::from_string(
            backend,
            "SELECT version() AS version",
        ))
        .one(db)
        .await?
        .map(|row| row.version)
        .unwrap_or_default();

        let mut tables = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            let rows = CountRow::find_by_statement(Statement::from_string(
                backend,
                format!("SELECT COUNT(*) AS count FROM {table}"),
            ))
            .one(db)
            .await?
            .map_or(0, |row| row.count);
            tables.push(TableStat { table, rows });
        }

        let migrations = AppliedMigration::find_by_statement(Statement::from_string(
            backend,
            "SELECT version, applied_at FROM seaql_migrations ORDER BY applied_at DESC, version DESC",
        ))
        .all(db)
        .await?;

        tracing::debug!(
            tables = tables.len(),
            migrations = migrations.len(),
            "Database statistics collected"
        );

        Ok(Self {
            server_version,
            tables,
            migrations,
        })
    }

    /// Total rows across all tables.
    #[must_use]
    pub fn total_rows(&self) -> i64 {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_rows() {
        let stats = DatabaseStats {
            server_version: "PostgreSQL 16.4".to_string(),
            tables: vec![
                TableStat {
                    table: "users",
                    rows: 3,
                },
                TableStat {
                    table: "groups",
                    rows: 2,
                },
            ],
            migrations: Vec::new(),
        };
        assert_eq!(stats.total_rows(), 5);
    }

    #[test]
    fn test_table_list_has_no_duplicates() {
        let mut tables = TABLES.to_vec();
        tables.sort_unstable();
        tables.dedup();
        assert_eq!(tables.len(), TABLES.len());
    }
}

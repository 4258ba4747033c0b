//! Database connection check for Hearth.
//!
//! Prints the server version, row counts per table and the applied
//! migrations. Exits non-zero if the database cannot be reached or queried.
//!
//! Usage: cargo run --bin healthcheck

use anyhow::Context;
use chrono::DateTime;
use hearth_db::DatabaseStats;
use hearth_shared::AppConfig;
use hearth_shared::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    telemetry::init(&config.logging);

    println!("Testing database connection...");
    let db = hearth_db::connect(&config.database)
        .await
        .context("Connection error")?;

    let stats = DatabaseStats::collect(&db)
        .await
        .context("Failed to query database")?;
    println!("Connection successful!");
    println!("PostgreSQL version: {}", stats.server_version);

    println!("Table statistics:");
    for table in &stats.tables {
        println!("  {}: {}", table.table, table.rows);
    }
    println!("  total: {}", stats.total_rows());

    println!("Applied migrations:");
    for migration in &stats.migrations {
        let applied = DateTime::from_timestamp(migration.applied_at, 0)
            .map_or_else(|| migration.applied_at.to_string(), |at| at.to_rfc3339());
        println!("  {} ({applied})", migration.version);
    }

    tracing::info!(
        tables = stats.tables.len(),
        migrations = stats.migrations.len(),
        "Health check passed"
    );
    Ok(())
}

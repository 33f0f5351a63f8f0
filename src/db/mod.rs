//! Database layer: SQLite pool setup, migrations, models, and handlers.
//!
//! Handlers follow a repository pattern over `&mut SqliteConnection` so they
//! compose inside transactions when callers need atomicity.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqlitePool, migrate::Migrator};
use std::str::FromStr;
use tracing::info;

use crate::config::DatabaseConfig;

pub mod handlers;
pub mod models;

/// Embedded migrations, also used by tests against in-memory databases
pub fn migrator() -> Migrator {
    sqlx::migrate!("./migrations")
}

/// Open the ledger database, creating the file if needed, and run migrations
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    migrator().run(&pool).await?;
    info!(url = %config.url, "Database ready");
    Ok(pool)
}

//! SQLite pool setup.
//!
//! Each store creates its own tables on construction, so opening the pool is
//! all the daemon does here.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

/// Open or create the gateway database at `path`.
pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            sqlx::Error::Configuration(format!("Failed to create db directory: {}", e).into())
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        // WAL mode for better concurrent read performance
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await
}

/// Single-connection in-memory pool.
///
/// Every connection to `sqlite::memory:` is a separate database, so the pool
/// must never open a second one.
pub async fn open_in_memory() -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
}

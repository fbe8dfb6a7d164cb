//! SQLite-backed sync record store.
//!
//! All sync bookkeeping lives in a single `sync_records` table. Timestamps
//! are stored as integer unix milliseconds so comparisons in SQL stay plain
//! integer comparisons.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

mod migrations;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("stored record has invalid {column} value: {value}")]
    InvalidColumn {
        column: &'static str,
        value: String,
    },
}

/// Handle to the sync record store.
///
/// Clones share the same connection pool.
#[derive(Clone)]
pub struct SyncStore {
    pool: SqlitePool,
}

impl SyncStore {
    /// Open (creating if needed) the store at `path` and bring its schema up
    /// to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        Self::connect(options).await
    }

    /// Open a fresh in-memory store. Used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        // SQLite serializes writers anyway; a single pooled connection avoids
        // SQLITE_BUSY churn under concurrent lease traffic.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        migrations::run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Current time as unix milliseconds, the store's native timestamp unit.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Converts a duration into whole milliseconds for timestamp arithmetic.
pub(crate) fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

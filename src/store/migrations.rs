//! Schema migrations, tracked through SQLite's `user_version` pragma.

use sqlx::SqlitePool;

use super::StoreError;

const SCHEMA_VERSION: i32 = 1;

/// Apply any migrations newer than the database's recorded version.
pub(super) async fn run(pool: &SqlitePool) -> Result<(), StoreError> {
    let version: i32 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;

    if version < 1 {
        migrate_v1(pool).await?;
    }

    if version < SCHEMA_VERSION {
        sqlx::query(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
            .execute(pool)
            .await?;
    }

    Ok(())
}

async fn migrate_v1(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sync_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT NOT NULL,
            internal_id TEXT,
            sync_status TEXT NOT NULL DEFAULT 'PENDING',
            sync_error_message TEXT,
            sync_retry_count INTEGER NOT NULL DEFAULT 0,
            last_sync_attempt_at INTEGER,
            last_successful_sync_at INTEGER,
            processing_status TEXT NOT NULL DEFAULT 'idle',
            processing_started_at INTEGER,
            processing_owner_id TEXT,
            processing_timeout_at INTEGER,
            sold_from TEXT,
            sold_at INTEGER,
            source_sold_at INTEGER,
            storefront_sold_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    // Neither key column is UNIQUE: concurrent observers can insert the same
    // listing twice, and the cleanup sweeps collapse the extras afterwards.
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_sync_records_external_id
            ON sync_records(external_id)",
        "CREATE INDEX IF NOT EXISTS idx_sync_records_internal_id
            ON sync_records(internal_id)",
        "CREATE INDEX IF NOT EXISTS idx_sync_records_processing
            ON sync_records(processing_status, processing_started_at)",
        "CREATE INDEX IF NOT EXISTS idx_sync_records_status_attempt
            ON sync_records(sync_status, last_sync_attempt_at)",
    ];
    for sql in indexes {
        sqlx::query(sql).execute(pool).await?;
    }

    Ok(())
}

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use crosslist_daemon::record::{observe_listing, SyncRecord};
use crosslist_daemon::store::SyncStore;

/// Fresh in-memory store with migrations applied.
pub async fn test_store() -> SyncStore {
    SyncStore::open_in_memory()
        .await
        .expect("Should open in-memory store")
}

/// Seed one record through the normal observation path.
pub async fn seed_record(store: &SyncStore, external_id: &str) -> SyncRecord {
    observe_listing(store, external_id)
        .await
        .expect("Should create sync record")
}

pub fn ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Backdate an in-flight lease: started `started_mins_ago` minutes ago with
/// its deadline `deadline_mins_ago` minutes in the past. Negative values put
/// the deadline in the future.
pub async fn backdate_lease(
    store: &SyncStore,
    external_id: &str,
    started_mins_ago: i64,
    deadline_mins_ago: i64,
) {
    let now = Utc::now();
    sqlx::query(
        "UPDATE sync_records
         SET processing_started_at = ?, processing_timeout_at = ?
         WHERE external_id = ?",
    )
    .bind(ms(now - Duration::minutes(started_mins_ago)))
    .bind(ms(now - Duration::minutes(deadline_mins_ago)))
    .bind(external_id)
    .execute(store.pool())
    .await
    .expect("Should backdate lease");
}

/// Insert a row directly with chosen timestamps, bypassing the lifecycle
/// functions. Returns the new row id.
pub async fn insert_raw_record(
    store: &SyncStore,
    external_id: &str,
    internal_id: Option<&str>,
    updated_at: DateTime<Utc>,
    last_successful_sync_at: Option<DateTime<Utc>>,
) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO sync_records
            (external_id, internal_id, sync_status, processing_status, sync_retry_count,
             last_successful_sync_at, created_at, updated_at)
         VALUES (?, ?, 'SYNCED', 'idle', 0, ?, ?, ?)
         RETURNING id",
    )
    .bind(external_id)
    .bind(internal_id)
    .bind(last_successful_sync_at.map(ms))
    .bind(ms(updated_at))
    .bind(ms(updated_at))
    .fetch_one(store.pool())
    .await
    .expect("Should insert record")
}

/// Put a record into an errored state whose last attempt happened
/// `attempted_days_ago` days ago.
pub async fn set_error_state(
    store: &SyncStore,
    external_id: &str,
    message: &str,
    attempted_days_ago: i64,
) {
    let attempt = Utc::now() - Duration::days(attempted_days_ago);
    sqlx::query(
        "UPDATE sync_records
         SET sync_status = 'ERROR', sync_error_message = ?, sync_retry_count = 3,
             last_sync_attempt_at = ?
         WHERE external_id = ?",
    )
    .bind(message)
    .bind(ms(attempt))
    .bind(external_id)
    .execute(store.pool())
    .await
    .expect("Should set error state");
}

pub async fn count_records(store: &SyncStore) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM sync_records")
        .fetch_one(store.pool())
        .await
        .expect("Should count records")
}

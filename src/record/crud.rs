//! Sync record lifecycle operations.
//!
//! These are the write paths the sync engine drives: first sight of a
//! listing, attempt outcomes, sold marking. Everything here addresses records
//! by the external marketplace id.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use super::types::{SoldFrom, SyncRecord, SyncRecordRow, SyncStatus, RECORD_COLUMNS};
use crate::store::{now_ms, StoreError, SyncStore};

/// Longest error message kept on a record; anything longer is clipped.
pub const MAX_ERROR_MESSAGE_LEN: usize = 1000;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("no sync record for listing {0}")]
    NotFound(String),
}

/// Fetch the record for a listing, if one exists.
///
/// Under duplicate rows the lowest row id wins, so repeated reads are stable.
pub async fn get_record(
    store: &SyncStore,
    external_id: &str,
) -> Result<Option<SyncRecord>, RecordError> {
    let row: Option<SyncRecordRow> = sqlx::query_as(&format!(
        "SELECT {RECORD_COLUMNS} FROM sync_records WHERE external_id = ? ORDER BY id LIMIT 1"
    ))
    .bind(external_id)
    .fetch_optional(store.pool())
    .await?;

    Ok(row.map(SyncRecordRow::into_record).transpose()?)
}

/// Return the record for a listing, creating a fresh PENDING one when the
/// listing has never been seen.
///
/// Lookup and insert are separate statements, so two observers racing on a
/// brand-new listing can both insert. That is accepted: the duplicate sweep
/// collapses the extras later.
pub async fn observe_listing(
    store: &SyncStore,
    external_id: &str,
) -> Result<SyncRecord, RecordError> {
    if let Some(existing) = get_record(store, external_id).await? {
        return Ok(existing);
    }

    let now = now_ms();
    let row: SyncRecordRow = sqlx::query_as(&format!(
        "INSERT INTO sync_records
            (external_id, sync_status, processing_status, sync_retry_count, created_at, updated_at)
         VALUES (?, 'PENDING', 'idle', 0, ?, ?)
         RETURNING {RECORD_COLUMNS}"
    ))
    .bind(external_id)
    .bind(now)
    .bind(now)
    .fetch_one(store.pool())
    .await?;

    debug!(external_id, "created sync record");
    Ok(row.into_record()?)
}

/// Record a fully successful sync attempt.
///
/// Clears the error state, zeroes the retry counter and links the storefront
/// product id when one is supplied.
pub async fn record_sync_success(
    store: &SyncStore,
    external_id: &str,
    internal_id: Option<&str>,
) -> Result<(), RecordError> {
    let now = now_ms();
    let result = sqlx::query(
        "UPDATE sync_records
         SET sync_status = 'SYNCED',
             internal_id = COALESCE(?, internal_id),
             sync_error_message = NULL,
             sync_retry_count = 0,
             last_sync_attempt_at = ?,
             last_successful_sync_at = ?,
             updated_at = ?
         WHERE external_id = ?",
    )
    .bind(internal_id)
    .bind(now)
    .bind(now)
    .bind(now)
    .bind(external_id)
    .execute(store.pool())
    .await?;

    if result.rows_affected() == 0 {
        return Err(RecordError::NotFound(external_id.to_string()));
    }
    Ok(())
}

/// Record a failed sync attempt with its diagnostic.
pub async fn record_sync_failure(
    store: &SyncStore,
    external_id: &str,
    message: &str,
) -> Result<(), RecordError> {
    record_attempt_error(store, external_id, SyncStatus::Error, message).await
}

/// Record a partially failed attempt: some steps landed, some did not.
pub async fn record_sync_partial(
    store: &SyncStore,
    external_id: &str,
    message: &str,
) -> Result<(), RecordError> {
    record_attempt_error(store, external_id, SyncStatus::PartialError, message).await
}

async fn record_attempt_error(
    store: &SyncStore,
    external_id: &str,
    status: SyncStatus,
    message: &str,
) -> Result<(), RecordError> {
    let now = now_ms();
    let result = sqlx::query(
        "UPDATE sync_records
         SET sync_status = ?,
             sync_error_message = ?,
             sync_retry_count = sync_retry_count + 1,
             last_sync_attempt_at = ?,
             updated_at = ?
         WHERE external_id = ?",
    )
    .bind(status.as_str())
    .bind(clip_message(message))
    .bind(now)
    .bind(now)
    .bind(external_id)
    .execute(store.pool())
    .await?;

    if result.rows_affected() == 0 {
        return Err(RecordError::NotFound(external_id.to_string()));
    }
    Ok(())
}

/// Record an attempt that found nothing to do.
pub async fn record_sync_skipped(store: &SyncStore, external_id: &str) -> Result<(), RecordError> {
    let now = now_ms();
    let result = sqlx::query(
        "UPDATE sync_records
         SET sync_status = 'SKIPPED_NO_CHANGE',
             last_sync_attempt_at = ?,
             updated_at = ?
         WHERE external_id = ?",
    )
    .bind(now)
    .bind(now)
    .bind(external_id)
    .execute(store.pool())
    .await?;

    if result.rows_affected() == 0 {
        return Err(RecordError::NotFound(external_id.to_string()));
    }
    Ok(())
}

/// Mark a listing sold on one side.
///
/// A listing already sold on the other side moves to `both`. The overall
/// `sold_at` keeps the first sale time; per-side times are tracked separately.
pub async fn mark_sold(
    store: &SyncStore,
    external_id: &str,
    sold_from: SoldFrom,
    at: DateTime<Utc>,
) -> Result<(), RecordError> {
    let sold_ms = at.timestamp_millis();
    let now = now_ms();
    let result = sqlx::query(
        "UPDATE sync_records
         SET sold_from = CASE
                 WHEN sold_from IS NULL OR sold_from = ?1 THEN ?1
                 ELSE 'both'
             END,
             sold_at = COALESCE(sold_at, ?2),
             source_sold_at = CASE
                 WHEN ?1 IN ('source', 'both') THEN COALESCE(source_sold_at, ?2)
                 ELSE source_sold_at
             END,
             storefront_sold_at = CASE
                 WHEN ?1 IN ('storefront', 'both') THEN COALESCE(storefront_sold_at, ?2)
                 ELSE storefront_sold_at
             END,
             updated_at = ?3
         WHERE external_id = ?4",
    )
    .bind(sold_from.as_str())
    .bind(sold_ms)
    .bind(now)
    .bind(external_id)
    .execute(store.pool())
    .await?;

    if result.rows_affected() == 0 {
        return Err(RecordError::NotFound(external_id.to_string()));
    }
    debug!(external_id, sold_from = %sold_from, "marked listing sold");
    Ok(())
}

/// Aggregate view over the record store.
#[derive(Debug, Clone)]
pub struct SyncStats {
    pub total_records: i64,
    /// Records currently marked processing, live lease or not.
    pub processing: i64,
    pub by_sync_status: Vec<(SyncStatus, i64)>,
}

/// Count records overall, in-processing and per sync status.
pub async fn sync_stats(store: &SyncStore) -> Result<SyncStats, RecordError> {
    let total_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_records")
        .fetch_one(store.pool())
        .await?;

    let processing: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sync_records WHERE processing_status = 'processing'",
    )
    .fetch_one(store.pool())
    .await?;

    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT sync_status, COUNT(*) FROM sync_records GROUP BY sync_status ORDER BY sync_status",
    )
    .fetch_all(store.pool())
    .await?;

    let mut by_sync_status = Vec::with_capacity(rows.len());
    for (status, count) in rows {
        let status = status.parse().map_err(|_| StoreError::InvalidColumn {
            column: "sync_status",
            value: status.clone(),
        })?;
        by_sync_status.push((status, count));
    }

    Ok(SyncStats {
        total_records,
        processing,
        by_sync_status,
    })
}

fn clip_message(message: &str) -> String {
    message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}

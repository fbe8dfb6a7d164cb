//! Processing leases over sync records.
//!
//! A lease is an exclusive claim on one listing while a worker syncs it.
//! Acquisition is a single conditional UPDATE, so two workers racing for the
//! same listing can never both win: whichever statement runs first flips the
//! record to `processing` and the other matches nothing. Leases carry a
//! deadline; once it passes the record is claimable again even though the
//! previous owner never released it.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::record::{SyncRecord, SyncRecordRow, RECORD_COLUMNS};
use crate::store::{duration_ms, now_ms, StoreError, SyncStore};

/// Diagnostic written to a record released as failed.
pub const FAILED_RELEASE_MESSAGE: &str = "Processing failed or timeout";

/// Diagnostic written to records reclaimed by `expire_stuck`.
pub const STUCK_TIMEOUT_MESSAGE: &str = "Processing timeout - stuck in processing state";

#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("store error: {0}")]
    StoreError(#[from] StoreError),
}

/// How a finished lease is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Success,
    Failure,
}

/// A live claim on one listing, as returned by a winning acquire.
#[derive(Debug, Clone)]
pub struct LeaseHandle {
    external_id: String,
    owner_id: String,
    record: SyncRecord,
}

impl LeaseHandle {
    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// The record as it looked the instant the lease was granted.
    pub fn record(&self) -> &SyncRecord {
        &self.record
    }

    pub fn into_record(self) -> SyncRecord {
        self.record
    }
}

/// Grants, releases and reclaims processing leases.
#[derive(Clone)]
pub struct LeaseManager {
    store: SyncStore,
}

impl LeaseManager {
    pub fn new(store: SyncStore) -> Self {
        Self { store }
    }

    /// Try to claim the listing for `owner_id` for the next `lease` period.
    ///
    /// The claim succeeds only if the record is not processing, or its
    /// previous lease deadline has already passed. Returns `None` when the
    /// listing is unknown or someone else holds a live lease; the caller
    /// must skip the listing, not wait.
    pub async fn acquire(
        &self,
        external_id: &str,
        owner_id: &str,
        lease: Duration,
    ) -> Result<Option<LeaseHandle>, LeaseError> {
        let now = now_ms();
        let deadline = now.saturating_add(duration_ms(lease));

        let row: Option<SyncRecordRow> = sqlx::query_as(&format!(
            "UPDATE sync_records
             SET processing_status = 'processing',
                 processing_started_at = ?1,
                 processing_owner_id = ?2,
                 processing_timeout_at = ?3,
                 updated_at = ?1
             WHERE external_id = ?4
               AND (processing_status != 'processing' OR processing_timeout_at < ?1)
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(now)
        .bind(owner_id)
        .bind(deadline)
        .bind(external_id)
        .fetch_optional(self.store.pool())
        .await?;

        match row {
            Some(row) => {
                let record = row.into_record()?;
                debug!(external_id, owner_id, "processing lease acquired");
                Ok(Some(LeaseHandle {
                    external_id: external_id.to_string(),
                    owner_id: owner_id.to_string(),
                    record,
                }))
            }
            None => {
                debug!(external_id, owner_id, "processing lease unavailable");
                Ok(None)
            }
        }
    }

    /// Release a lease held by `owner_id`.
    ///
    /// Only the owner that acquired the lease can release it; any other
    /// caller matches nothing and gets `false` back. A failure release also
    /// marks the record's sync state as errored with a fixed diagnostic, so
    /// downstream sweeps can tell lease failures from sync failures.
    pub async fn release(
        &self,
        external_id: &str,
        owner_id: &str,
        outcome: ReleaseOutcome,
    ) -> Result<bool, LeaseError> {
        let now = now_ms();
        let result = match outcome {
            ReleaseOutcome::Success => {
                sqlx::query(
                    "UPDATE sync_records
                     SET processing_status = 'completed',
                         processing_started_at = NULL,
                         processing_owner_id = NULL,
                         processing_timeout_at = NULL,
                         updated_at = ?
                     WHERE external_id = ? AND processing_owner_id = ?",
                )
                .bind(now)
                .bind(external_id)
                .bind(owner_id)
                .execute(self.store.pool())
                .await?
            }
            ReleaseOutcome::Failure => {
                sqlx::query(
                    "UPDATE sync_records
                     SET processing_status = 'failed',
                         processing_started_at = NULL,
                         processing_owner_id = NULL,
                         processing_timeout_at = NULL,
                         sync_status = 'ERROR',
                         sync_error_message = ?,
                         updated_at = ?
                     WHERE external_id = ? AND processing_owner_id = ?",
                )
                .bind(FAILED_RELEASE_MESSAGE)
                .bind(now)
                .bind(external_id)
                .bind(owner_id)
                .execute(self.store.pool())
                .await?
            }
        };

        let released = result.rows_affected() > 0;
        if released {
            debug!(external_id, owner_id, ?outcome, "processing lease released");
        } else {
            warn!(
                external_id,
                owner_id, "lease release matched no record; lease expired or never held"
            );
        }
        Ok(released)
    }

    /// Release `handle` marking the work done.
    pub async fn complete(&self, handle: &LeaseHandle) -> Result<bool, LeaseError> {
        self.release(handle.external_id(), handle.owner_id(), ReleaseOutcome::Success)
            .await
    }

    /// Release `handle` marking the work failed.
    pub async fn fail(&self, handle: &LeaseHandle) -> Result<bool, LeaseError> {
        self.release(handle.external_id(), handle.owner_id(), ReleaseOutcome::Failure)
            .await
    }

    /// Reclaim every record stuck in `processing` longer than `timeout`.
    ///
    /// Stuckness is judged on when processing started, not on the lease
    /// deadline, so a crashed worker's claim is recovered even if it asked
    /// for a generous lease. Returns how many records were reclaimed.
    pub async fn expire_stuck(&self, timeout: Duration) -> Result<u64, LeaseError> {
        let now = now_ms();
        let cutoff = now.saturating_sub(duration_ms(timeout));

        let result = sqlx::query(
            "UPDATE sync_records
             SET processing_status = 'failed',
                 processing_started_at = NULL,
                 processing_owner_id = NULL,
                 processing_timeout_at = NULL,
                 sync_status = 'ERROR',
                 sync_error_message = ?,
                 updated_at = ?
             WHERE processing_status = 'processing' AND processing_started_at < ?",
        )
        .bind(STUCK_TIMEOUT_MESSAGE)
        .bind(now)
        .bind(cutoff)
        .execute(self.store.pool())
        .await?;

        let expired = result.rows_affected();
        if expired > 0 {
            info!(
                expired,
                timeout_secs = timeout.as_secs(),
                "reclaimed stuck processing leases"
            );
        }
        Ok(expired)
    }
}

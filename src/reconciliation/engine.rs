//! Cleanup sweep engine.
//!
//! Each sweep repairs one class of drift in the record store: leases that
//! outlived their worker, duplicate rows, and errored records old enough to
//! deserve another chance. `full_sweep` chains all of them in a fixed order.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use super::duplicates::{self, DuplicateCollapse, DuplicateKey};
use crate::lease::{LeaseError, LeaseManager};
use crate::store::{duration_ms, now_ms, StoreError, SyncStore};

/// Lease age after which a processing record counts as stuck.
pub const DEFAULT_STUCK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Error age after which a record is returned to the pending pool.
pub const DEFAULT_STALE_ERROR_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Error, Debug)]
pub enum ReconciliationError {
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("lease recovery error: {0}")]
    LeaseError(#[from] LeaseError),

    #[error("cleanup step '{step}' failed: {source}")]
    StepFailed {
        step: &'static str,
        #[source]
        source: Box<ReconciliationError>,
    },
}

/// Tunables for the periodic sweeps.
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub stuck_timeout: Duration,
    pub stale_error_age: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            stuck_timeout: DEFAULT_STUCK_TIMEOUT,
            stale_error_age: DEFAULT_STALE_ERROR_AGE,
        }
    }
}

/// What one full sweep accomplished.
#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub stuck_recovered: u64,
    pub external_duplicates_removed: u64,
    pub internal_duplicates_removed: u64,
    pub stale_errors_reset: u64,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

/// Runs the cleanup sweeps against one record store.
pub struct ReconciliationEngine {
    store: SyncStore,
    leases: LeaseManager,
    config: ReconciliationConfig,
}

impl ReconciliationEngine {
    pub fn new(store: SyncStore) -> Self {
        Self::with_config(store, ReconciliationConfig::default())
    }

    pub fn with_config(store: SyncStore, config: ReconciliationConfig) -> Self {
        let leases = LeaseManager::new(store.clone());
        Self {
            store,
            leases,
            config,
        }
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Reclaim leases stuck in `processing` longer than `timeout`.
    pub async fn recover_stuck_leases(&self, timeout: Duration) -> Result<u64, ReconciliationError> {
        Ok(self.leases.expire_stuck(timeout).await?)
    }

    /// Collapse duplicate records sharing the given key.
    pub async fn collapse_duplicates(
        &self,
        key: DuplicateKey,
    ) -> Result<DuplicateCollapse, ReconciliationError> {
        duplicates::collapse(&self.store, key).await
    }

    /// Return errored records older than `age` to the pending pool.
    ///
    /// Resets the status, diagnostic and retry counter so the sync engine
    /// picks the listings up again. Records under a processing lease and
    /// records that never recorded an attempt are left alone.
    pub async fn reset_stale_errors(&self, age: Duration) -> Result<u64, ReconciliationError> {
        let now = now_ms();
        let cutoff = now.saturating_sub(duration_ms(age));

        let result = sqlx::query(
            "UPDATE sync_records
             SET sync_status = 'PENDING',
                 sync_error_message = NULL,
                 sync_retry_count = 0,
                 updated_at = ?
             WHERE sync_status = 'ERROR'
               AND last_sync_attempt_at < ?
               AND processing_status != 'processing'",
        )
        .bind(now)
        .bind(cutoff)
        .execute(self.store.pool())
        .await?;

        let reset = result.rows_affected();
        if reset > 0 {
            info!(reset, age_days = age.as_secs() / 86_400, "reset stale errored records to pending");
        }
        Ok(reset)
    }

    /// Run every sweep in order: stuck leases, duplicates by external key,
    /// duplicates by internal key, stale errors.
    ///
    /// The first failing step aborts the sweep and its name is carried in the
    /// error; steps already finished keep their effects.
    pub async fn full_sweep(&self) -> Result<SweepSummary, ReconciliationError> {
        let started = std::time::Instant::now();
        info!("cleanup sweep started");

        let stuck_recovered = self
            .recover_stuck_leases(self.config.stuck_timeout)
            .await
            .map_err(|e| step_failed("stuck_leases", e))?;

        let external = self
            .collapse_duplicates(DuplicateKey::ExternalId)
            .await
            .map_err(|e| step_failed("duplicates_by_external", e))?;

        let internal = self
            .collapse_duplicates(DuplicateKey::InternalId)
            .await
            .map_err(|e| step_failed("duplicates_by_internal", e))?;

        let stale_errors_reset = self
            .reset_stale_errors(self.config.stale_error_age)
            .await
            .map_err(|e| step_failed("old_errors", e))?;

        let summary = SweepSummary {
            stuck_recovered,
            external_duplicates_removed: external.total_removed,
            internal_duplicates_removed: internal.total_removed,
            stale_errors_reset,
            duration_ms: started.elapsed().as_millis() as u64,
            finished_at: Utc::now(),
        };

        info!(
            stuck = summary.stuck_recovered,
            external_duplicates = summary.external_duplicates_removed,
            internal_duplicates = summary.internal_duplicates_removed,
            stale_errors = summary.stale_errors_reset,
            duration_ms = summary.duration_ms,
            "cleanup sweep finished"
        );
        Ok(summary)
    }
}

fn step_failed(step: &'static str, source: ReconciliationError) -> ReconciliationError {
    ReconciliationError::StepFailed {
        step,
        source: Box::new(source),
    }
}

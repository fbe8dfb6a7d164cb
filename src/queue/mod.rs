//! In-process cleanup job queue.
//!
//! A bounded channel feeds a single worker task, so cleanup jobs never run
//! concurrently with each other. Producers get a job id back immediately;
//! completion and failure are surfaced through log events carrying that id.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use uuid::Uuid;

use crate::reconciliation::{
    DuplicateCollapse, DuplicateKey, ReconciliationEngine, ReconciliationError, SweepSummary,
};

/// Default bound on queued-but-unprocessed cleanup jobs.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// The cleanup operations a job can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupJobKind {
    Full,
    Stuck,
    DuplicatesByExternal,
    DuplicatesByInternal,
    OldErrors,
}

impl CleanupJobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupJobKind::Full => "full",
            CleanupJobKind::Stuck => "stuck",
            CleanupJobKind::DuplicatesByExternal => "duplicates_by_external",
            CleanupJobKind::DuplicatesByInternal => "duplicates_by_internal",
            CleanupJobKind::OldErrors => "old_errors",
        }
    }
}

impl fmt::Display for CleanupJobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleanupJobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(CleanupJobKind::Full),
            "stuck" => Ok(CleanupJobKind::Stuck),
            "duplicates_by_external" => Ok(CleanupJobKind::DuplicatesByExternal),
            "duplicates_by_internal" => Ok(CleanupJobKind::DuplicatesByInternal),
            "old_errors" => Ok(CleanupJobKind::OldErrors),
            _ => Err(format!("unknown cleanup job kind: {s}")),
        }
    }
}

/// Per-job overrides; unset fields fall back to the engine configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupJobOptions {
    /// Lease timeout in minutes for `stuck` jobs.
    pub timeout_minutes: Option<u64>,
    /// Error age in days for `old_errors` jobs.
    pub older_than_days: Option<u64>,
}

/// One queued cleanup request.
#[derive(Debug, Clone)]
pub struct CleanupJob {
    pub id: Uuid,
    pub kind: CleanupJobKind,
    pub options: CleanupJobOptions,
}

impl CleanupJob {
    pub fn new(kind: CleanupJobKind, options: CleanupJobOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            options,
        }
    }
}

/// What a finished cleanup job produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupOutcome {
    Sweep(SweepSummary),
    StuckRecovered { count: u64 },
    DuplicatesCollapsed(DuplicateCollapse),
    StaleErrorsReset { count: u64 },
}

/// Executes cleanup jobs. The reconciliation engine is the production
/// implementation; tests substitute their own.
#[async_trait]
pub trait SweepRunner: Send + Sync {
    async fn run_job(&self, job: &CleanupJob) -> Result<CleanupOutcome, ReconciliationError>;
}

#[async_trait]
impl SweepRunner for ReconciliationEngine {
    async fn run_job(&self, job: &CleanupJob) -> Result<CleanupOutcome, ReconciliationError> {
        match job.kind {
            CleanupJobKind::Full => Ok(CleanupOutcome::Sweep(self.full_sweep().await?)),
            CleanupJobKind::Stuck => {
                let timeout = job
                    .options
                    .timeout_minutes
                    .map(|minutes| Duration::from_secs(minutes * 60))
                    .unwrap_or(self.config().stuck_timeout);
                Ok(CleanupOutcome::StuckRecovered {
                    count: self.recover_stuck_leases(timeout).await?,
                })
            }
            CleanupJobKind::DuplicatesByExternal => Ok(CleanupOutcome::DuplicatesCollapsed(
                self.collapse_duplicates(DuplicateKey::ExternalId).await?,
            )),
            CleanupJobKind::DuplicatesByInternal => Ok(CleanupOutcome::DuplicatesCollapsed(
                self.collapse_duplicates(DuplicateKey::InternalId).await?,
            )),
            CleanupJobKind::OldErrors => {
                let age = job
                    .options
                    .older_than_days
                    .map(|days| Duration::from_secs(days * 86_400))
                    .unwrap_or(self.config().stale_error_age);
                Ok(CleanupOutcome::StaleErrorsReset {
                    count: self.reset_stale_errors(age).await?,
                })
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("cleanup queue is full")]
    Full,

    #[error("cleanup queue is closed")]
    Closed,
}

/// Producer handle onto the cleanup queue. Cheap to clone.
#[derive(Clone)]
pub struct CleanupQueue {
    tx: mpsc::Sender<CleanupJob>,
}

impl CleanupQueue {
    /// Enqueue a job without blocking; a full queue is reported, not waited
    /// out. Returns the job id.
    pub fn enqueue(
        &self,
        kind: CleanupJobKind,
        options: CleanupJobOptions,
    ) -> Result<Uuid, QueueError> {
        let job = CleanupJob::new(kind, options);
        let id = job.id;
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })?;
        info!(job_id = %id, %kind, "cleanup job enqueued");
        Ok(id)
    }
}

/// Create a queue handle and the receiving end for its worker.
pub fn cleanup_channel(capacity: usize) -> (CleanupQueue, mpsc::Receiver<CleanupJob>) {
    let (tx, rx) = mpsc::channel(capacity);
    (CleanupQueue { tx }, rx)
}

/// Drains cleanup jobs one at a time.
pub struct CleanupWorker<R: SweepRunner> {
    runner: Arc<R>,
    rx: mpsc::Receiver<CleanupJob>,
}

impl<R: SweepRunner> CleanupWorker<R> {
    pub fn new(runner: Arc<R>, rx: mpsc::Receiver<CleanupJob>) -> Self {
        Self { runner, rx }
    }

    /// Process jobs until the queue closes or the shutdown flag flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                job = self.rx.recv() => {
                    let Some(job) = job else { break };
                    self.process(job).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("cleanup worker stopped");
    }

    async fn process(&self, job: CleanupJob) {
        info!(job_id = %job.id, kind = %job.kind, "cleanup job started");
        match self.runner.run_job(&job).await {
            Ok(outcome) => {
                let result = serde_json::to_string(&outcome).unwrap_or_default();
                info!(job_id = %job.id, kind = %job.kind, %result, "cleanup job completed");
            }
            Err(e) => {
                error!(job_id = %job.id, kind = %job.kind, error = %e, "cleanup job failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_round_trip() {
        for kind in [
            CleanupJobKind::Full,
            CleanupJobKind::Stuck,
            CleanupJobKind::DuplicatesByExternal,
            CleanupJobKind::DuplicatesByInternal,
            CleanupJobKind::OldErrors,
        ] {
            assert_eq!(kind.as_str().parse::<CleanupJobKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_job_kind_rejects_unknown() {
        assert!("weekly".parse::<CleanupJobKind>().is_err());
        assert!("FULL".parse::<CleanupJobKind>().is_err());
    }

    #[test]
    fn test_new_jobs_get_distinct_ids() {
        let a = CleanupJob::new(CleanupJobKind::Full, CleanupJobOptions::default());
        let b = CleanupJob::new(CleanupJobKind::Full, CleanupJobOptions::default());
        assert_ne!(a.id, b.id);
    }
}

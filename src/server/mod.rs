use crate::queue::{CleanupJobKind, CleanupJobOptions, CleanupQueue};
use crate::record::{self, SyncStats};
use crate::scheduler::CleanupScheduler;
use crate::store::SyncStore;
use std::sync::Arc;
use tonic::{Request, Response, Status};

// Import generated protobuf types
pub mod proto {
    tonic::include_proto!("crosslist");
}

use proto::crosslist_daemon_server::CrosslistDaemon;
use proto::*;

pub struct CrosslistDaemonService {
    store: SyncStore,
    scheduler: Arc<CleanupScheduler>,
    /// `None` when the queue backend is disabled by configuration.
    queue: Option<CleanupQueue>,
}

impl CrosslistDaemonService {
    pub fn new(
        store: SyncStore,
        scheduler: Arc<CleanupScheduler>,
        queue: Option<CleanupQueue>,
    ) -> Self {
        Self {
            store,
            scheduler,
            queue,
        }
    }
}

#[tonic::async_trait]
impl CrosslistDaemon for CrosslistDaemonService {
    async fn run_cleanup(
        &self,
        _request: Request<RunCleanupRequest>,
    ) -> Result<Response<RunCleanupResponse>, Status> {
        match self.scheduler.run_manual().await {
            Ok(summary) => Ok(Response::new(RunCleanupResponse {
                success: true,
                error: String::new(),
                summary: Some(summary_to_proto(&summary)),
            })),
            Err(e) => Ok(Response::new(RunCleanupResponse {
                success: false,
                error: e.to_string(),
                summary: None,
            })),
        }
    }

    async fn enqueue_cleanup(
        &self,
        request: Request<EnqueueCleanupRequest>,
    ) -> Result<Response<EnqueueCleanupResponse>, Status> {
        let req = request.into_inner();

        let Some(queue) = &self.queue else {
            return Ok(Response::new(EnqueueCleanupResponse {
                success: false,
                error: "queue backend is disabled".to_string(),
                job_id: String::new(),
            }));
        };

        let kind: CleanupJobKind = match req.kind.parse() {
            Ok(kind) => kind,
            Err(e) => {
                return Ok(Response::new(EnqueueCleanupResponse {
                    success: false,
                    error: e,
                    job_id: String::new(),
                }))
            }
        };

        let options = CleanupJobOptions {
            timeout_minutes: (req.timeout_minutes > 0).then_some(req.timeout_minutes),
            older_than_days: (req.older_than_days > 0).then_some(req.older_than_days),
        };

        match queue.enqueue(kind, options) {
            Ok(job_id) => Ok(Response::new(EnqueueCleanupResponse {
                success: true,
                error: String::new(),
                job_id: job_id.to_string(),
            })),
            Err(e) => Ok(Response::new(EnqueueCleanupResponse {
                success: false,
                error: e.to_string(),
                job_id: String::new(),
            })),
        }
    }

    async fn get_scheduler_status(
        &self,
        _request: Request<GetSchedulerStatusRequest>,
    ) -> Result<Response<SchedulerStatusResponse>, Status> {
        let status = self.scheduler.status().await;
        Ok(Response::new(SchedulerStatusResponse {
            is_running: status.is_running,
            cron_expression: status.cron_expression,
            timezone: status.timezone,
            duplicate_prevention_enabled: status.duplicate_prevention_enabled,
            queue_backend_enabled: status.queue_backend_enabled,
        }))
    }

    async fn get_sync_stats(
        &self,
        _request: Request<GetSyncStatsRequest>,
    ) -> Result<Response<SyncStatsResponse>, Status> {
        match record::sync_stats(&self.store).await {
            Ok(stats) => Ok(Response::new(stats_to_proto(&stats))),
            Err(e) => Err(Status::internal(e.to_string())),
        }
    }
}

fn summary_to_proto(summary: &crate::reconciliation::SweepSummary) -> SweepSummary {
    SweepSummary {
        stuck_recovered: summary.stuck_recovered,
        external_duplicates_removed: summary.external_duplicates_removed,
        internal_duplicates_removed: summary.internal_duplicates_removed,
        stale_errors_reset: summary.stale_errors_reset,
        duration_ms: summary.duration_ms,
        finished_at: summary.finished_at.to_rfc3339(),
    }
}

fn stats_to_proto(stats: &SyncStats) -> SyncStatsResponse {
    SyncStatsResponse {
        total_records: stats.total_records,
        processing: stats.processing,
        by_sync_status: stats
            .by_sync_status
            .iter()
            .map(|(status, count)| StatusCount {
                status: status.to_string(),
                count: *count,
            })
            .collect(),
    }
}

pub mod config;
pub mod lease;
pub mod queue;
pub mod reconciliation;
pub mod record;
pub mod scheduler;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use config::{read_config, CleanupConfig, ConfigError};
pub use lease::{
    LeaseError, LeaseHandle, LeaseManager, ReleaseOutcome, FAILED_RELEASE_MESSAGE,
    STUCK_TIMEOUT_MESSAGE,
};
pub use queue::{
    cleanup_channel, CleanupJob, CleanupJobKind, CleanupJobOptions, CleanupOutcome, CleanupQueue,
    CleanupWorker, QueueError, SweepRunner,
};
pub use reconciliation::{
    DuplicateCollapse, DuplicateKey, ReconciliationConfig, ReconciliationEngine,
    ReconciliationError, SweepSummary,
};
pub use record::{
    get_record, mark_sold, observe_listing, record_sync_failure, record_sync_partial,
    record_sync_skipped, record_sync_success, sync_stats, ProcessingStatus, RecordError,
    SoldFrom, SyncRecord, SyncStats, SyncStatus,
};
pub use scheduler::{
    CleanupScheduler, ScheduleError, ScheduleSpec, SchedulerConfig, SchedulerStatus,
};
pub use server::CrosslistDaemonService;
pub use store::{StoreError, SyncStore};

mod crud;
mod types;

pub use crud::{
    get_record, mark_sold, observe_listing, record_sync_failure, record_sync_partial,
    record_sync_skipped, record_sync_success, sync_stats, RecordError, SyncStats,
    MAX_ERROR_MESSAGE_LEN,
};
pub use types::{ProcessingStatus, SoldFrom, SyncRecord, SyncStatus};

pub(crate) use types::{SyncRecordRow, RECORD_COLUMNS};

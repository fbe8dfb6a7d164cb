mod duplicates;
mod engine;

pub use duplicates::{DuplicateCollapse, DuplicateKey};
pub use engine::{
    ReconciliationConfig, ReconciliationEngine, ReconciliationError, SweepSummary,
    DEFAULT_STALE_ERROR_AGE, DEFAULT_STUCK_TIMEOUT,
};

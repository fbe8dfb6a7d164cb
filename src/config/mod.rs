use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::reconciliation::ReconciliationConfig;
use crate::scheduler::SchedulerConfig;

/// Schedule the cleanup sweep runs on unless configured otherwise.
pub const DEFAULT_CLEANUP_CRON: &str = "0 */6 * * *";

/// Timezone reported by the scheduler. Sweeps always run in UTC.
pub const DEFAULT_TIMEZONE: &str = "UTC";

pub const DEFAULT_STUCK_TIMEOUT_MINUTES: u64 = 30;

pub const DEFAULT_STALE_ERROR_AGE_DAYS: u64 = 7;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

fn default_true() -> bool {
    true
}

fn default_cron() -> String {
    DEFAULT_CLEANUP_CRON.to_string()
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_stuck_timeout_minutes() -> u64 {
    DEFAULT_STUCK_TIMEOUT_MINUTES
}

fn default_stale_error_age_days() -> u64 {
    DEFAULT_STALE_ERROR_AGE_DAYS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Cleanup and scheduling configuration.
///
/// Usually assembled from command-line flags; a JSON config file with the
/// same fields (camelCase) can be supplied instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupConfig {
    /// Master switch for the duplicate-prevention machinery. When off, the
    /// scheduler never arms.
    #[serde(default = "default_true")]
    pub duplicate_prevention_enabled: bool,
    /// Whether the in-process job queue (and with it the scheduler) is
    /// available.
    #[serde(default = "default_true")]
    pub queue_backend_enabled: bool,
    #[serde(default = "default_cron")]
    pub cron_expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_stuck_timeout_minutes")]
    pub stuck_timeout_minutes: u64,
    #[serde(default = "default_stale_error_age_days")]
    pub stale_error_age_days: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            duplicate_prevention_enabled: default_true(),
            queue_backend_enabled: default_true(),
            cron_expression: default_cron(),
            timezone: default_timezone(),
            stuck_timeout_minutes: default_stuck_timeout_minutes(),
            stale_error_age_days: default_stale_error_age_days(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl CleanupConfig {
    pub fn reconciliation(&self) -> ReconciliationConfig {
        ReconciliationConfig {
            stuck_timeout: Duration::from_secs(self.stuck_timeout_minutes * 60),
            stale_error_age: Duration::from_secs(self.stale_error_age_days * 86_400),
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            cron_expression: self.cron_expression.clone(),
            timezone: self.timezone.clone(),
            duplicate_prevention_enabled: self.duplicate_prevention_enabled,
            queue_backend_enabled: self.queue_backend_enabled,
        }
    }
}

/// Read a configuration file, or `None` if it does not exist.
pub async fn read_config(path: &Path) -> Result<Option<CleanupConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).await?;
    let config: CleanupConfig = serde_json::from_str(&content)?;
    Ok(Some(config))
}

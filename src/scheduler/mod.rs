//! Periodic cleanup scheduling.
//!
//! The scheduler owns a timer task that runs a full cleanup sweep on a cron
//! schedule. It stays inert when the queue backend is unavailable or
//! duplicate prevention is switched off; manual sweeps keep working either
//! way.

mod schedule;

pub use schedule::{ScheduleError, ScheduleSpec};

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_CLEANUP_CRON, DEFAULT_TIMEZONE};
use crate::reconciliation::{ReconciliationEngine, ReconciliationError, SweepSummary};

/// Scheduler settings, echoed back verbatim by `status`.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub cron_expression: String,
    /// Reported to clients for display. Sweep times are computed in UTC.
    pub timezone: String,
    pub duplicate_prevention_enabled: bool,
    pub queue_backend_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cron_expression: DEFAULT_CLEANUP_CRON.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            duplicate_prevention_enabled: true,
            queue_backend_enabled: true,
        }
    }
}

/// Snapshot of the scheduler for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub cron_expression: String,
    pub timezone: String,
    pub duplicate_prevention_enabled: bool,
    pub queue_backend_enabled: bool,
}

enum State {
    Uninitialized,
    Scheduled {
        shutdown: watch::Sender<bool>,
        task: JoinHandle<()>,
    },
    Stopped,
}

/// Arms and tears down the periodic cleanup timer.
pub struct CleanupScheduler {
    engine: Arc<ReconciliationEngine>,
    config: SchedulerConfig,
    state: Mutex<State>,
}

impl CleanupScheduler {
    pub fn new(engine: Arc<ReconciliationEngine>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            state: Mutex::new(State::Uninitialized),
        }
    }

    /// Arm the periodic sweep timer.
    ///
    /// Does nothing when the queue backend or duplicate prevention is
    /// disabled, or when the configured cron expression does not parse; in
    /// all three cases the daemon keeps running without periodic cleanup.
    pub async fn initialize(&self) {
        if !self.config.queue_backend_enabled {
            info!("queue backend disabled, cleanup scheduler not started");
            return;
        }
        if !self.config.duplicate_prevention_enabled {
            info!("duplicate prevention disabled, cleanup scheduler not started");
            return;
        }

        let spec = match ScheduleSpec::parse(&self.config.cron_expression) {
            Ok(spec) => spec,
            Err(e) => {
                error!(
                    cron = %self.config.cron_expression,
                    error = %e,
                    "invalid cleanup schedule, scheduler not started"
                );
                return;
            }
        };

        if self.config.timezone != DEFAULT_TIMEZONE {
            warn!(
                timezone = %self.config.timezone,
                "cleanup schedule runs in UTC; the configured timezone is reported but not applied"
            );
        }

        let mut state = self.state.lock().await;
        if matches!(*state, State::Scheduled { .. }) {
            warn!("cleanup scheduler already initialized");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(&self.engine);
        let task = tokio::spawn(run_timer(engine, spec, shutdown_rx));
        *state = State::Scheduled {
            shutdown: shutdown_tx,
            task,
        };
        info!(cron = %self.config.cron_expression, "cleanup scheduler initialized");
    }

    /// Stop the timer and wait for it to wind down. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, State::Stopped);
        if let State::Scheduled { shutdown, task } = previous {
            let _ = shutdown.send(true);
            let _ = task.await;
            info!("cleanup scheduler stopped");
        }
    }

    /// Run a full sweep right now, regardless of scheduler state.
    ///
    /// Unlike timer-driven sweeps, failures propagate to the caller.
    pub async fn run_manual(&self) -> Result<SweepSummary, ReconciliationError> {
        info!("manual cleanup sweep requested");
        self.engine.full_sweep().await
    }

    /// Report the scheduler state together with its configuration.
    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;
        SchedulerStatus {
            is_running: matches!(*state, State::Scheduled { .. }),
            cron_expression: self.config.cron_expression.clone(),
            timezone: self.config.timezone.clone(),
            duplicate_prevention_enabled: self.config.duplicate_prevention_enabled,
            queue_backend_enabled: self.config.queue_backend_enabled,
        }
    }
}

async fn run_timer(
    engine: Arc<ReconciliationEngine>,
    spec: ScheduleSpec,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let now = Utc::now();
        let next = spec.next_fire_after(now);
        let wait = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
        debug!(next_fire = %next, "cleanup timer armed");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                // A failed scheduled sweep is logged, not fatal; the next
                // tick fires as usual.
                if let Err(e) = engine.full_sweep().await {
                    error!(error = %e, "scheduled cleanup sweep failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

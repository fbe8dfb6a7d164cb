mod config;
mod lease;
mod queue;
mod reconciliation;
mod record;
mod scheduler;
mod server;
mod store;

use anyhow::Context;
use clap::Parser;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::Method;
use server::proto::crosslist_daemon_server::CrosslistDaemonServer;
use server::CrosslistDaemonService;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tonic::transport::Server;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::{
    read_config, CleanupConfig, DEFAULT_CLEANUP_CRON, DEFAULT_STALE_ERROR_AGE_DAYS,
    DEFAULT_STUCK_TIMEOUT_MINUTES, DEFAULT_TIMEZONE,
};
use queue::{cleanup_channel, CleanupWorker, DEFAULT_QUEUE_CAPACITY};
use reconciliation::ReconciliationEngine;
use scheduler::CleanupScheduler;
use store::SyncStore;

const DEFAULT_ADDR: &str = "127.0.0.1:50051";
const DEFAULT_CORS_ORIGINS: &str = "http://localhost,https://localhost,http://127.0.0.1,https://127.0.0.1";
const DEFAULT_DB_PATH: &str = "crosslist.db";

/// Crosslist Daemon - keeps marketplace listings and storefront products in sync
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, env = "CROSSLIST_DAEMON_ADDR", default_value = DEFAULT_ADDR)]
    addr: String,

    /// Comma-separated list of allowed CORS origins.
    /// Use "*" to allow all origins (not recommended for production).
    #[arg(
        long,
        env = "CROSSLIST_CORS_ORIGINS",
        default_value = DEFAULT_CORS_ORIGINS,
        value_delimiter = ','
    )]
    cors_origins: Vec<String>,

    /// Path to the SQLite sync record store
    #[arg(long, env = "CROSSLIST_DB_PATH", default_value = DEFAULT_DB_PATH)]
    db_path: PathBuf,

    /// Optional JSON config file; when present it replaces the cleanup flags
    /// below
    #[arg(long, env = "CROSSLIST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable the duplicate-prevention sweeps and scheduler
    #[arg(
        long,
        env = "CROSSLIST_DUPLICATE_PREVENTION",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    duplicate_prevention: bool,

    /// Enable the in-process cleanup job queue
    #[arg(
        long,
        env = "CROSSLIST_QUEUE_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    queue_enabled: bool,

    /// Cron expression for scheduled cleanup sweeps
    #[arg(long, env = "CROSSLIST_CLEANUP_CRON", default_value = DEFAULT_CLEANUP_CRON)]
    cleanup_cron: String,

    /// Timezone reported by the scheduler (sweep times are computed in UTC)
    #[arg(long, env = "CROSSLIST_TIMEZONE", default_value = DEFAULT_TIMEZONE)]
    timezone: String,

    /// Minutes before an in-flight processing lease counts as stuck
    #[arg(
        long,
        env = "CROSSLIST_STUCK_TIMEOUT_MINUTES",
        default_value_t = DEFAULT_STUCK_TIMEOUT_MINUTES
    )]
    stuck_timeout_minutes: u64,

    /// Days before an errored record is reset to pending
    #[arg(
        long,
        env = "CROSSLIST_STALE_ERROR_AGE_DAYS",
        default_value_t = DEFAULT_STALE_ERROR_AGE_DAYS
    )]
    stale_error_age_days: u64,

    /// Cleanup job queue capacity
    #[arg(long, env = "CROSSLIST_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,
}

impl Args {
    fn cleanup_config(&self) -> CleanupConfig {
        CleanupConfig {
            duplicate_prevention_enabled: self.duplicate_prevention,
            queue_backend_enabled: self.queue_enabled,
            cron_expression: self.cleanup_cron.clone(),
            timezone: self.timezone.clone(),
            stuck_timeout_minutes: self.stuck_timeout_minutes,
            stale_error_age_days: self.stale_error_age_days,
            queue_capacity: self.queue_capacity,
        }
    }
}

// Include the file descriptor set for gRPC reflection
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("crosslist_descriptor");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse CLI arguments
    let args = Args::parse();

    // Parse address
    let addr = args.addr.parse().context("invalid bind address")?;

    // Process CORS origins
    let cors_origins: Vec<String> = args
        .cors_origins
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let allow_all_origins = cors_origins.iter().any(|o| o == "*");

    info!(
        "CORS origins: {}",
        if allow_all_origins {
            "*".to_string()
        } else {
            cors_origins.join(", ")
        }
    );

    // Resolve cleanup configuration: config file wins over flags
    let cleanup = match &args.config {
        Some(path) => match read_config(path).await.context("failed to read config file")? {
            Some(file_config) => {
                info!(config = %path.display(), "loaded cleanup config file");
                file_config
            }
            None => {
                warn!(config = %path.display(), "config file not found, using flags");
                args.cleanup_config()
            }
        },
        None => args.cleanup_config(),
    };

    // Open the record store
    let store = SyncStore::open(&args.db_path)
        .await
        .context("failed to open sync record store")?;
    info!(db = %args.db_path.display(), "sync record store ready");

    let engine = Arc::new(ReconciliationEngine::with_config(
        store.clone(),
        cleanup.reconciliation(),
    ));

    // Shutdown fan-out for background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Cleanup queue and its worker
    let (queue, worker_handle) = if cleanup.queue_backend_enabled {
        let (queue, rx) = cleanup_channel(cleanup.queue_capacity);
        let worker = CleanupWorker::new(Arc::clone(&engine), rx);
        let handle = tokio::spawn(worker.run(shutdown_rx.clone()));
        (Some(queue), Some(handle))
    } else {
        info!("queue backend disabled, cleanup worker not started");
        (None, None)
    };

    // Periodic cleanup scheduler
    let scheduler = Arc::new(CleanupScheduler::new(
        Arc::clone(&engine),
        cleanup.scheduler(),
    ));
    scheduler.initialize().await;

    let service = CrosslistDaemonService::new(store.clone(), Arc::clone(&scheduler), queue);

    // Create reflection service
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    // Configure CORS for gRPC-Web
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            if allow_all_origins {
                return true;
            }

            if let Ok(origin_str) = origin.to_str() {
                cors_origins
                    .iter()
                    .any(|allowed| origin_str.starts_with(allowed))
            } else {
                false
            }
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            "x-grpc-web".parse().unwrap(),
            "x-user-agent".parse().unwrap(),
            "grpc-timeout".parse().unwrap(),
        ])
        .expose_headers([
            "grpc-status".parse().unwrap(),
            "grpc-message".parse().unwrap(),
            "grpc-status-details-bin".parse().unwrap(),
        ]);

    info!("Starting Crosslist daemon on {} (gRPC + gRPC-Web)", addr);

    Server::builder()
        .accept_http1(true) // Required for gRPC-Web
        .layer(cors)
        .layer(tonic_web::GrpcWebLayer::new())
        .add_service(reflection_service)
        .add_service(CrosslistDaemonServer::new(service))
        .serve_with_shutdown(addr, async {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal, stopping server...");
        })
        .await?;

    // Wind down background tasks before exiting
    scheduler.stop().await;
    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker_handle {
        handle.await.ok();
    }

    info!("Crosslist daemon stopped");
    Ok(())
}

//! sked-import - scheduling data import service
//!
//! Runs the import job orchestrator (worker pool + stall monitor) against a
//! SQLite-backed store and serves health, job progress and the import event
//! stream over HTTP.

use anyhow::Result;
use clap::Parser;
use sked_common::events::EventBus;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sked_import::collaborators::{Collaborators, JsonDirBlobStore, KvCatalog};
use sked_import::config::ImportServiceConfig;
use sked_import::db::{JobRepository, KvStore, SnapshotRepository, SqliteStore};
use sked_import::services::{JobOrchestrator, ProgressTracker};
use sked_import::AppState;

#[derive(Debug, Parser)]
#[command(name = "sked-import", version, about = "Scheduling data import service")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ImportServiceConfig::load(args.config.as_deref())?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting sked-import");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database.path.display());

    let pool = sked_import::db::init_database_pool(&config.database.path).await?;
    let store: Arc<dyn KvStore> =
        Arc::new(SqliteStore::new(pool, config.database.max_lock_wait_ms).await?);
    info!("Database connection established");

    let event_bus = EventBus::new(256);

    let jobs = Arc::new(JobRepository::new(Arc::clone(&store), config.retention.job_ttl()));
    let snapshots = SnapshotRepository::new(Arc::clone(&store), config.progress.snapshot_ttl());
    let tracker = Arc::new(ProgressTracker::new(
        Arc::clone(&jobs),
        snapshots,
        event_bus.clone(),
        config.progress.throughput_window,
    ));

    let catalog = Arc::new(KvCatalog::new(Arc::clone(&store)));
    let collaborators = Collaborators {
        blob_store: Arc::new(JsonDirBlobStore::new(&config.dependencies.blob_dir)),
        sink: catalog.clone(),
        directory: catalog,
    };

    let orchestrator = Arc::new(JobOrchestrator::new(
        jobs,
        Arc::clone(&tracker),
        collaborators,
        event_bus.clone(),
        config.orchestrator_settings(),
    ));
    let recovered = orchestrator.recover().await?;
    info!(recovered, "Job recovery complete");
    orchestrator.start().await;

    let state = AppState::new(event_bus, tracker, Arc::clone(&orchestrator));
    let app = sked_import::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("Listening on http://{}", config.server.bind);
    info!("Health check: http://{}/health", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Could not listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
        })
        .await?;

    orchestrator.shutdown().await;
    Ok(())
}

//! depsyncd - dependency-sync worker daemon.
//!
//! Leases dependency-sync jobs from the database-backed queue and
//! resolves each finished upload's package dependencies: catalog
//! insertion, registry re-sync stamping, and downstream indexing-job
//! scheduling.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use depsync_core::SyncJob;
use depsync_db::{Database, PoolConfig};
use depsync_worker::{
    DependencySyncHandler, Handler, Operations, Worker, WorkerOptions, WorkerStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let db = Database::connect_with_config(&database_url, PoolConfig::from_env())
        .await
        .context("failed to connect to database")?;

    let stats = db.worker_jobs.queue_stats().await?;
    info!(
        queued = stats.queued,
        processing = stats.processing,
        failed = stats.failed,
        "Queue state at startup"
    );

    // One operation set per process, shared by every handler invocation.
    let ops = Arc::new(Operations::new());
    let handler: Arc<dyn Handler<SyncJob>> = Arc::new(DependencySyncHandler::new(
        db.codeintel.clone(),
        db.external_services.clone(),
        ops,
    ));
    let store: Arc<dyn WorkerStore<SyncJob>> = db.worker_jobs.clone();

    let options = WorkerOptions::from_env("dependency-sync");
    let worker = Worker::new(store, handler, options);
    let handle = worker.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received, draining in-flight jobs");

    handle.shutdown().await;
    info!("depsyncd stopped");
    Ok(())
}

/// Initialize tracing: `RUST_LOG` env filter, human-readable output by
/// default, JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

//! # depsync-db
//!
//! PostgreSQL store implementations for depsync.
//!
//! This crate provides:
//! - Connection pool management
//! - The lease-based job store (`FOR UPDATE SKIP LOCKED` claiming)
//! - The dependency-repo catalog and reference scanner
//! - The external-service store
//!
//! ## Example
//!
//! ```rust,ignore
//! use depsync_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/depsync").await?;
//!     let stats = db.worker_jobs.queue_stats().await?;
//!     println!("{} jobs queued", stats.queued);
//!     Ok(())
//! }
//! ```

pub mod codeintel;
pub mod external_services;
pub mod pool;
pub mod worker_store;

use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use depsync_core::{Error, Result};

pub use codeintel::PgCodeIntelStore;
pub use external_services::PgExternalServiceStore;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use worker_store::PgWorkerStore;

// Re-export core types
pub use depsync_core::*;

/// Bundle of all store implementations backed by one connection pool.
pub struct Database {
    pool: PgPool,
    pub worker_jobs: Arc<PgWorkerStore>,
    pub codeintel: Arc<PgCodeIntelStore>,
    pub external_services: Arc<PgExternalServiceStore>,
}

impl Database {
    /// Connect with default pool configuration and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with_config(database_url, PoolConfig::default()).await
    }

    /// Connect with the given pool configuration and run migrations.
    pub async fn connect_with_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(database_url, config).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Internal(format!("migration failed: {e}")))?;
        info!("Database migrations applied");

        Ok(Self::from_pool(pool))
    }

    /// Build the store bundle from an existing pool (no migrations).
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            worker_jobs: Arc::new(PgWorkerStore::new(pool.clone())),
            codeintel: Arc::new(PgCodeIntelStore::new(pool.clone())),
            external_services: Arc::new(PgExternalServiceStore::new(pool.clone())),
            pool,
        }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

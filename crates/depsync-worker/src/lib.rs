//! # depsync-worker
//!
//! Worker engine and dependency-sync handler for depsync.
//!
//! This crate provides:
//! - A generic pool of poll loops leasing records from a job store
//! - Lease heartbeats, panic recovery, and terminal state transitions
//! - The dependency-sync handler (classify, dedup, registry re-sync,
//!   indexing-job fan-out)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use depsync_worker::{DependencySyncHandler, Operations, Worker, WorkerOptions};
//! use depsync_db::Database;
//!
//! let db = Database::connect("postgres://...").await?;
//! let ops = Arc::new(Operations::new());
//!
//! let handler = Arc::new(DependencySyncHandler::new(
//!     db.codeintel.clone(),
//!     db.external_services.clone(),
//!     ops,
//! ));
//!
//! let worker = Worker::new(
//!     db.worker_jobs.clone(),
//!     handler,
//!     WorkerOptions::from_env("dependency-sync"),
//! );
//! let handle = worker.start();
//!
//! // ... run until shutdown ...
//! handle.shutdown().await;
//! ```

pub mod classify;
pub mod handler;
pub mod ops;
pub mod sync;
pub mod worker;

// Re-export core types
pub use depsync_core::*;

pub use classify::{kind_for_scheme, normalize_package, should_index_dependencies};
pub use handler::{Handler, NoOpHandler};
pub use ops::{Operation, Operations};
pub use sync::DependencySyncHandler;
pub use worker::{Worker, WorkerHandle, WorkerOptions};

//! # depsync-core
//!
//! Shared types for the depsync dependency-sync pipeline.
//!
//! This crate provides:
//! - The job record model and its lifecycle state machine
//! - Store traits consumed by the worker engine and handlers
//! - The core error type, including explicit multi-error aggregation
//! - Centralized default constants and structured-logging field names

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

pub use error::{AggregateError, Error, ErrorList, Result};
pub use models::{
    ExternalService, ExternalServiceFilter, JobState, Package, PackageReference, QueueStats,
    SyncJob, Upload,
};
pub use traits::{CodeIntelStore, ExternalServiceStore, Record, ReferenceScanner, WorkerStore};

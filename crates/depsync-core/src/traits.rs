//! Store traits consumed by the worker engine and handlers.
//!
//! All stores are shared across worker instances as `Arc<dyn Trait>`;
//! every mutation of shared state goes through these atomic operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    ExternalService, ExternalServiceFilter, Package, PackageReference, QueueStats, SyncJob, Upload,
};
use crate::Result;

// =============================================================================
// JOB STORE
// =============================================================================

/// A schedulable unit of work with a persistent identity.
///
/// The worker engine is generic over the record type, so each job kind
/// gets a strongly typed handler instead of a runtime payload cast.
pub trait Record: Clone + Send + Sync + 'static {
    fn record_id(&self) -> i64;
}

impl Record for SyncJob {
    fn record_id(&self) -> i64 {
        self.id
    }
}

/// Persisted queue of job records with lease-based mutual exclusion.
///
/// Implementations must guarantee at-most-one-active-lease per record:
/// no two concurrent `dequeue` calls, across any number of worker
/// processes, may both claim the same record.
#[async_trait]
pub trait WorkerStore<R: Record>: Send + Sync {
    /// Atomically claim one eligible record (queued and past its retry
    /// gate, or processing with an expired lease) and transition it to
    /// `processing`, stamping the lease owner and heartbeat.
    ///
    /// Returns `None` when no eligible record exists; that is not an
    /// error. Stalled records encountered during the scan are requeued
    /// with `num_resets` incremented, or failed once past the reset
    /// ceiling.
    async fn dequeue(&self) -> Result<Option<R>>;

    /// Extend the lease on a record this worker is processing. A record
    /// no longer held by the caller is left untouched.
    async fn heartbeat(&self, record_id: i64) -> Result<()>;

    /// Terminal success transition.
    async fn mark_complete(&self, record_id: i64) -> Result<()>;

    /// Failure transition: increments `num_failures`, then either
    /// requeues with a backoff delay or, at the failure ceiling, goes
    /// terminal `failed`.
    async fn mark_errored(&self, record_id: i64, message: &str) -> Result<()>;

    /// Queue statistics for operator visibility.
    async fn queue_stats(&self) -> Result<QueueStats>;
}

// =============================================================================
// CODE INTELLIGENCE STORE
// =============================================================================

/// Forward-only cursor over an upload's package references.
///
/// Exclusively owned by one handler invocation. Restartable from the
/// start (by opening a new scanner) but not resumable mid-stream.
#[async_trait]
pub trait ReferenceScanner: Send {
    /// The next reference, or `None` at end of stream.
    async fn next(&mut self) -> Result<Option<PackageReference>>;

    /// Release the cursor. Must be called on every exit path; errors
    /// here are merged into the caller's result, never dropped.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Dependency-repository catalog and upload metadata store.
#[async_trait]
pub trait CodeIntelStore: Send + Sync {
    /// Open a scanner over the upload's package references.
    async fn references_for_upload(&self, upload_id: i64) -> Result<Box<dyn ReferenceScanner>>;

    /// Idempotently insert a cloneable dependency repo for the given
    /// normalized package. Returns `true` if the catalog entry is new,
    /// `false` if it already existed. Never duplicates.
    async fn insert_cloneable_dependency_repo(&self, pkg: &Package) -> Result<bool>;

    /// Look up an upload.
    async fn get_upload_by_id(&self, upload_id: i64) -> Result<Option<Upload>>;

    /// Insert a downstream dependency-indexing job for the given
    /// external-service kind, not to run before `not_before`.
    async fn insert_dependency_indexing_job(
        &self,
        upload_id: i64,
        external_service_kind: &str,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

// =============================================================================
// EXTERNAL SERVICE STORE
// =============================================================================

/// Registry connection descriptions.
#[async_trait]
pub trait ExternalServiceStore: Send + Sync {
    /// List external services matching the filter. Rejects an empty kind
    /// list: an unfiltered listing would return every configured service.
    async fn list(&self, filter: &ExternalServiceFilter) -> Result<Vec<ExternalService>>;

    /// Upsert a service description. This subsystem only ever changes
    /// `next_sync_at`.
    async fn upsert(&self, service: &ExternalService) -> Result<()>;
}

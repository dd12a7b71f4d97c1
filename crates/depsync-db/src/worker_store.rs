//! Job store implementation for dependency-sync jobs.
//!
//! Mutual exclusion comes from row-level locking: the claim statement
//! selects one eligible row `FOR UPDATE SKIP LOCKED`, so concurrent
//! dequeues across a worker fleet never lease the same record twice.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use depsync_core::{defaults, Error, QueueStats, Result, SyncJob, WorkerStore};

/// PostgreSQL implementation of `WorkerStore<SyncJob>`.
pub struct PgWorkerStore {
    pool: PgPool,
    /// Lease-owner identity stamped on every claimed record.
    worker_id: String,
    max_num_failures: i32,
    max_num_resets: i32,
    stalled_after: Duration,
    retry_delay: Duration,
}

impl PgWorkerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            worker_id: format!("worker-{}", Uuid::new_v4()),
            max_num_failures: defaults::MAX_NUM_FAILURES,
            max_num_resets: defaults::MAX_NUM_RESETS,
            stalled_after: Duration::seconds(defaults::STALLED_AFTER_SECS),
            retry_delay: Duration::seconds(defaults::RETRY_DELAY_SECS),
        }
    }

    /// Override the failure ceiling.
    pub fn with_max_failures(mut self, n: i32) -> Self {
        self.max_num_failures = n;
        self
    }

    /// Override the stall threshold.
    pub fn with_stalled_after(mut self, d: Duration) -> Self {
        self.stalled_after = d;
        self
    }

    /// The lease-owner identity of this store instance.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Producer-side insert of a new sync job for an upload.
    pub async fn enqueue(&self, upload_id: i64) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO dependency_sync_jobs (upload_id, state, queued_at)
             VALUES ($1, 'queued', $2)
             RETURNING id",
        )
        .bind(upload_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    /// Requeue stalled records and fail those past the reset ceiling.
    ///
    /// Runs ahead of every claim so records abandoned by a dead worker
    /// become eligible again without a separate janitor process.
    async fn sweep_stalled(&self) -> Result<()> {
        let stall_cutoff = Utc::now() - self.stalled_after;

        let failed = sqlx::query(
            "UPDATE dependency_sync_jobs
             SET state = 'failed', finished_at = $1,
                 failure_message = 'job processing stalled too many times'
             WHERE state = 'processing'
               AND last_heartbeat_at < $2
               AND num_resets >= $3",
        )
        .bind(Utc::now())
        .bind(stall_cutoff)
        .bind(self.max_num_resets)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let reset = sqlx::query(
            "UPDATE dependency_sync_jobs
             SET state = 'queued', num_resets = num_resets + 1,
                 started_at = NULL, last_heartbeat_at = NULL, worker_hostname = NULL
             WHERE state = 'processing'
               AND last_heartbeat_at < $1",
        )
        .bind(stall_cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if reset.rows_affected() > 0 || failed.rows_affected() > 0 {
            debug!(
                reset = reset.rows_affected(),
                failed = failed.rows_affected(),
                "Swept stalled sync jobs"
            );
        }
        Ok(())
    }

    fn parse_job_row(row: PgRow) -> Result<SyncJob> {
        let state: String = row.get("state");
        Ok(SyncJob {
            id: row.get("id"),
            upload_id: row.get("upload_id"),
            state: state.parse()?,
            failure_message: row.get("failure_message"),
            num_failures: row.get("num_failures"),
            num_resets: row.get("num_resets"),
            queued_at: row.get("queued_at"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            process_after: row.get("process_after"),
            last_heartbeat_at: row.get("last_heartbeat_at"),
            worker_hostname: row.get("worker_hostname"),
        })
    }
}

#[async_trait]
impl WorkerStore<SyncJob> for PgWorkerStore {
    async fn dequeue(&self) -> Result<Option<SyncJob>> {
        self.sweep_stalled().await?;

        let now = Utc::now();
        let row = sqlx::query(
            "UPDATE dependency_sync_jobs
             SET state = 'processing', started_at = $1, last_heartbeat_at = $1,
                 worker_hostname = $2, failure_message = NULL
             WHERE id = (
                 SELECT id FROM dependency_sync_jobs
                 WHERE state = 'queued'
                   AND (process_after IS NULL OR process_after <= $1)
                 ORDER BY queued_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, upload_id, state, failure_message, num_failures, num_resets,
                       queued_at, started_at, finished_at, process_after,
                       last_heartbeat_at, worker_hostname",
        )
        .bind(now)
        .bind(&self.worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn heartbeat(&self, record_id: i64) -> Result<()> {
        // Guarded by lease owner: a reclaimed record is left untouched.
        sqlx::query(
            "UPDATE dependency_sync_jobs
             SET last_heartbeat_at = $1
             WHERE id = $2 AND state = 'processing' AND worker_hostname = $3",
        )
        .bind(Utc::now())
        .bind(record_id)
        .bind(&self.worker_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn mark_complete(&self, record_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE dependency_sync_jobs
             SET state = 'completed', finished_at = $1
             WHERE id = $2 AND state = 'processing' AND worker_hostname = $3",
        )
        .bind(Utc::now())
        .bind(record_id)
        .bind(&self.worker_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn mark_errored(&self, record_id: i64, message: &str) -> Result<()> {
        // Guarded by lease owner like the other transitions: a record
        // reclaimed by another worker must not be failed by the old one.
        let now = Utc::now();
        sqlx::query(
            "UPDATE dependency_sync_jobs
             SET num_failures = num_failures + 1,
                 failure_message = $1,
                 state = CASE WHEN num_failures + 1 >= $2 THEN 'failed' ELSE 'queued' END,
                 finished_at = CASE WHEN num_failures + 1 >= $2 THEN $3 ELSE NULL END,
                 process_after = CASE WHEN num_failures + 1 >= $2 THEN NULL ELSE $4 END,
                 started_at = NULL, last_heartbeat_at = NULL, worker_hostname = NULL
             WHERE id = $5 AND state = 'processing' AND worker_hostname = $6",
        )
        .bind(message)
        .bind(self.max_num_failures)
        .bind(now)
        .bind(now + self.retry_delay)
        .bind(record_id)
        .bind(&self.worker_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                 COUNT(*) FILTER (WHERE state = 'queued') AS queued,
                 COUNT(*) FILTER (WHERE state = 'processing') AS processing,
                 COUNT(*) FILTER (WHERE state = 'completed') AS completed,
                 COUNT(*) FILTER (WHERE state = 'failed') AS failed,
                 COUNT(*) AS total
             FROM dependency_sync_jobs",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            queued: row.get("queued"),
            processing: row.get("processing"),
            completed: row.get("completed"),
            failed: row.get("failed"),
            total: row.get("total"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_worker_id_is_unique_per_store() {
        // Two stores sharing a pool must not share a lease identity.
        // Construct without connecting; the pool is lazy.
        let pool = PgPool::connect_lazy("postgres://localhost/depsync").unwrap();
        let a = PgWorkerStore::new(pool.clone());
        let b = PgWorkerStore::new(pool);
        assert_ne!(a.worker_id(), b.worker_id());
        assert!(a.worker_id().starts_with("worker-"));
    }

    #[tokio::test]
    async fn test_builder_overrides() {
        let pool = PgPool::connect_lazy("postgres://localhost/depsync").unwrap();
        let store = PgWorkerStore::new(pool)
            .with_max_failures(1)
            .with_stalled_after(Duration::seconds(5));
        assert_eq!(store.max_num_failures, 1);
        assert_eq!(store.stalled_after, Duration::seconds(5));
    }
}

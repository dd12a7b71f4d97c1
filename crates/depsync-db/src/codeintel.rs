//! Code-intelligence store: package references, the dependency-repo
//! catalog, uploads, and downstream indexing jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use depsync_core::{
    defaults, CodeIntelStore, Error, Package, PackageReference, ReferenceScanner, Result, Upload,
};

/// PostgreSQL implementation of `CodeIntelStore`.
pub struct PgCodeIntelStore {
    pool: PgPool,
}

impl PgCodeIntelStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CodeIntelStore for PgCodeIntelStore {
    async fn references_for_upload(&self, upload_id: i64) -> Result<Box<dyn ReferenceScanner>> {
        Ok(Box::new(PgReferenceScanner {
            pool: self.pool.clone(),
            upload_id,
            last_id: 0,
            buffer: Vec::new(),
            exhausted: false,
        }))
    }

    async fn insert_cloneable_dependency_repo(&self, pkg: &Package) -> Result<bool> {
        // ON CONFLICT DO NOTHING returns a row only for a fresh insert,
        // so "already existed" is the absence of a returned id.
        let inserted: Option<i64> = sqlx::query_scalar(
            "INSERT INTO dependency_repos (scheme, name, version)
             VALUES ($1, $2, $3)
             ON CONFLICT (scheme, name, version) DO NOTHING
             RETURNING id",
        )
        .bind(&pkg.scheme)
        .bind(&pkg.name)
        .bind(&pkg.version)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(inserted.is_some())
    }

    async fn get_upload_by_id(&self, upload_id: i64) -> Result<Option<Upload>> {
        let row = sqlx::query(
            "SELECT id, repository_id, commit_sha, indexer FROM uploads WHERE id = $1",
        )
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| Upload {
            id: r.get("id"),
            repository_id: r.get("repository_id"),
            commit: r.get("commit_sha"),
            indexer: r.get("indexer"),
        }))
    }

    async fn insert_dependency_indexing_job(
        &self,
        upload_id: i64,
        external_service_kind: &str,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO dependency_indexing_jobs
                 (upload_id, external_service_kind, external_service_sync, state, queued_at)
             VALUES ($1, $2, $3, 'queued', $4)",
        )
        .bind(upload_id)
        .bind(external_service_kind)
        .bind(not_before)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

/// Keyset-paged forward-only cursor over `upload_references`.
///
/// Pages are ordered by row id, so the scan visits each reference
/// exactly once without holding a transaction open across handler I/O.
struct PgReferenceScanner {
    pool: PgPool,
    upload_id: i64,
    last_id: i64,
    buffer: Vec<(i64, PackageReference)>,
    exhausted: bool,
}

impl PgReferenceScanner {
    async fn fill_buffer(&mut self) -> Result<()> {
        let rows = sqlx::query(
            "SELECT id, scheme, name, version
             FROM upload_references
             WHERE upload_id = $1 AND id > $2
             ORDER BY id ASC
             LIMIT $3",
        )
        .bind(self.upload_id)
        .bind(self.last_id)
        .bind(defaults::REFERENCE_SCAN_PAGE_SIZE)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        if rows.is_empty() {
            self.exhausted = true;
            return Ok(());
        }

        // Reverse so next() can pop from the back in ascending id order.
        self.buffer = rows
            .into_iter()
            .rev()
            .map(|r| {
                (
                    r.get::<i64, _>("id"),
                    PackageReference {
                        scheme: r.get("scheme"),
                        name: r.get("name"),
                        version: r.get("version"),
                    },
                )
            })
            .collect();
        Ok(())
    }
}

#[async_trait]
impl ReferenceScanner for PgReferenceScanner {
    async fn next(&mut self) -> Result<Option<PackageReference>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill_buffer().await?;
        }
        match self.buffer.pop() {
            Some((id, reference)) => {
                self.last_id = id;
                Ok(Some(reference))
            }
            None => Ok(None),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // Keyset pagination holds no server-side resources.
        Ok(())
    }
}

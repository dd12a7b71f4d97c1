//! External service (package registry) store.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use depsync_core::{
    Error, ExternalService, ExternalServiceFilter, ExternalServiceStore, Result,
};

/// PostgreSQL implementation of `ExternalServiceStore`.
pub struct PgExternalServiceStore {
    pool: PgPool,
}

impl PgExternalServiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExternalServiceStore for PgExternalServiceStore {
    async fn list(&self, filter: &ExternalServiceFilter) -> Result<Vec<ExternalService>> {
        // An empty filter would match every configured registry.
        if filter.kinds.is_empty() {
            return Err(Error::InvalidInput(
                "external service listing requires at least one kind".into(),
            ));
        }

        let rows = sqlx::query(
            "SELECT id, kind, display_name, next_sync_at
             FROM external_services
             WHERE kind = ANY($1)
             ORDER BY id ASC",
        )
        .bind(&filter.kinds)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|r| ExternalService {
                id: r.get("id"),
                kind: r.get("kind"),
                display_name: r.get("display_name"),
                next_sync_at: r.get("next_sync_at"),
            })
            .collect())
    }

    async fn upsert(&self, service: &ExternalService) -> Result<()> {
        sqlx::query(
            "INSERT INTO external_services (id, kind, display_name, next_sync_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE
             SET kind = EXCLUDED.kind,
                 display_name = EXCLUDED.display_name,
                 next_sync_at = EXCLUDED.next_sync_at",
        )
        .bind(service.id)
        .bind(&service.kind)
        .bind(&service.display_name)
        .bind(service.next_sync_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

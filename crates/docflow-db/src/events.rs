//! Durable event sink backed by the `ingestion_event` table.
//!
//! Events are observational only. Callers spawn `log_event` fire-and-forget;
//! a failed insert is logged and swallowed upstream, never propagated into
//! the pipeline run that emitted it.

use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use async_trait::async_trait;
use docflow_core::{Error, EventSink, PipelineEvent, Result};

/// PostgreSQL event sink.
pub struct PgEventSink {
    pool: Pool<Postgres>,
}

impl PgEventSink {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Recent events for one ingestion, oldest first. Diagnostic helper.
    pub async fn recent_for_ingestion(
        &self,
        ingestion_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PipelineEvent>> {
        let rows = sqlx::query(
            "SELECT ingestion_id, owner_id, kind, stage, details
             FROM ingestion_event
             WHERE ingestion_id = $1
             ORDER BY created_at ASC
             LIMIT $2",
        )
        .bind(ingestion_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| PipelineEvent {
                ingestion_id: row.get("ingestion_id"),
                owner_id: row.get("owner_id"),
                kind: row.get("kind"),
                stage: row.get("stage"),
                details: row.get("details"),
            })
            .collect())
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    async fn log_event(&self, event: PipelineEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO ingestion_event (id, ingestion_id, owner_id, kind, stage, details)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::now_v7())
        .bind(event.ingestion_id)
        .bind(event.owner_id)
        .bind(&event.kind)
        .bind(&event.stage)
        .bind(&event.details)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

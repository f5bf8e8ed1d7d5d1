//! Ingestion repository: lifecycle rows for documents moving through the
//! pipeline.
//!
//! Traces are stored as a JSONB array and appended with `||` so re-runs
//! extend history instead of replacing it. Tags are a text[] column and
//! survive re-runs untouched.

use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use async_trait::async_trait;
use docflow_core::{
    CreateIngestionRequest, Error, Ingestion, IngestionOutcome, IngestionRepository,
    IngestionStatus, Result, SourceKind, TraceStep,
};

/// PostgreSQL ingestion repository.
pub struct PgIngestionRepository {
    pool: Pool<Postgres>,
}

impl PgIngestionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(r: &sqlx::postgres::PgRow) -> Ingestion {
        let source: String = r.get("source");
        let status: String = r.get("status");
        let trace: JsonValue = r.get("trace");
        Ingestion {
            id: r.get("id"),
            owner_id: r.get("owner_id"),
            source: SourceKind::parse(&source).unwrap_or(SourceKind::Upload), // fallback
            filename: r.get("filename"),
            mime_type: r.get("mime_type"),
            size_bytes: r.get("size_bytes"),
            content_hash: r.get("content_hash"),
            status: IngestionStatus::parse(&status).unwrap_or(IngestionStatus::Error), // fallback
            matched_policy_id: r.get("matched_policy_id"),
            matched_policy_name: r.get("matched_policy_name"),
            extracted_fields: r.get("extracted_fields"),
            actions_executed: r.get("actions_executed"),
            error_message: r.get("error_message"),
            trace: serde_json::from_value(trace).unwrap_or_default(),
            tags: r.get("tags"),
            summary: r.get("summary"),
            document_text: r.get("document_text"),
            file_path: r.get("file_path"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }
    }
}

#[async_trait]
impl IngestionRepository for PgIngestionRepository {
    async fn insert(&self, req: CreateIngestionRequest) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let trace = serde_json::to_value(&req.trace)?;
        sqlx::query(
            "INSERT INTO ingestion (id, owner_id, source, filename, mime_type, size_bytes,
                                    content_hash, status, file_path, trace, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(id)
        .bind(req.owner_id)
        .bind(req.source.as_str())
        .bind(&req.filename)
        .bind(&req.mime_type)
        .bind(req.size_bytes)
        .bind(&req.content_hash)
        .bind(req.status.as_str())
        .bind(&req.file_path)
        .bind(&trace)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Ingestion> {
        let row = sqlx::query(
            "SELECT id, owner_id, source, filename, mime_type, size_bytes, content_hash,
                    status, matched_policy_id, matched_policy_name, extracted_fields,
                    actions_executed, error_message, trace, tags, summary, document_text,
                    file_path, created_at, updated_at
             FROM ingestion WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref()
            .map(Self::parse_row)
            .ok_or(Error::IngestionNotFound(id))
    }

    async fn list(
        &self,
        owner_id: Uuid,
        status: Option<IngestionStatus>,
        limit: i64,
    ) -> Result<Vec<Ingestion>> {
        let rows = sqlx::query(
            "SELECT id, owner_id, source, filename, mime_type, size_bytes, content_hash,
                    status, matched_policy_id, matched_policy_name, extracted_fields,
                    actions_executed, error_message, trace, tags, summary, document_text,
                    file_path, created_at, updated_at
             FROM ingestion
             WHERE owner_id = $1 AND ($2::text IS NULL OR status = $2)
             ORDER BY created_at DESC
             LIMIT $3",
        )
        .bind(owner_id)
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn find_by_content_hash(
        &self,
        owner_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<Ingestion>> {
        let row = sqlx::query(
            "SELECT id, owner_id, source, filename, mime_type, size_bytes, content_hash,
                    status, matched_policy_id, matched_policy_name, extracted_fields,
                    actions_executed, error_message, trace, tags, summary, document_text,
                    file_path, created_at, updated_at
             FROM ingestion
             WHERE owner_id = $1 AND content_hash = $2 AND status <> 'error'
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(owner_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: IngestionStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE ingestion SET status = $2, error_message = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn store_entities(
        &self,
        id: Uuid,
        entities: &JsonValue,
        summary: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE ingestion SET
                extracted_fields = $2,
                summary = COALESCE($3, summary),
                updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(entities)
        .bind(summary)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn store_document_text(&self, id: Uuid, text: &str) -> Result<()> {
        sqlx::query("UPDATE ingestion SET document_text = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(text)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn record_outcome(&self, id: Uuid, outcome: IngestionOutcome) -> Result<()> {
        sqlx::query(
            "UPDATE ingestion SET
                status = COALESCE($2, status),
                matched_policy_id = COALESCE($3, matched_policy_id),
                matched_policy_name = COALESCE($4, matched_policy_name),
                extracted_fields = COALESCE($5, extracted_fields),
                actions_executed = COALESCE($6, actions_executed),
                error_message = COALESCE($7, error_message),
                summary = COALESCE($8, summary),
                updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(outcome.status.map(|s| s.as_str()))
        .bind(outcome.matched_policy_id)
        .bind(outcome.matched_policy_name)
        .bind(outcome.extracted_fields)
        .bind(outcome.actions_executed)
        .bind(outcome.error_message)
        .bind(outcome.summary)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn append_trace(&self, id: Uuid, steps: &[TraceStep]) -> Result<()> {
        if steps.is_empty() {
            return Ok(());
        }
        let steps_json = serde_json::to_value(steps)?;
        sqlx::query("UPDATE ingestion SET trace = trace || $2::jsonb, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(&steps_json)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn add_tags(&self, id: Uuid, tags: &[String]) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        // EXCEPT drops tags already present and deduplicates the new list.
        sqlx::query(
            "UPDATE ingestion
             SET tags = tags || ARRAY(SELECT unnest($2::text[]) EXCEPT SELECT unnest(tags)),
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(tags)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn reset_for_rerun(&self, id: Uuid) -> Result<Ingestion> {
        let row = sqlx::query(
            "UPDATE ingestion SET
                status = 'processing',
                matched_policy_id = NULL,
                matched_policy_name = NULL,
                extracted_fields = '{}'::jsonb,
                actions_executed = '[]'::jsonb,
                error_message = NULL,
                summary = NULL,
                updated_at = now()
             WHERE id = $1
             RETURNING id, owner_id, source, filename, mime_type, size_bytes, content_hash,
                       status, matched_policy_id, matched_policy_name, extracted_fields,
                       actions_executed, error_message, trace, tags, summary, document_text,
                       file_path, created_at, updated_at",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref()
            .map(Self::parse_row)
            .ok_or(Error::IngestionNotFound(id))
    }
}

//! Chunk repository: content-addressed embedding vectors per ingestion.
//!
//! Chunks are scoped by `(provider, model)` and carry their dimensionality
//! in a `dims` column, so vectors from different embedding models coexist
//! in one table and similarity search never compares across models.

use pgvector::Vector;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use async_trait::async_trait;
use docflow_core::{ChunkHit, ChunkRepository, EmbeddingScope, Error, NewChunk, Result};

/// PostgreSQL chunk repository.
pub struct PgChunkRepository {
    pool: Pool<Postgres>,
}

impl PgChunkRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChunkRepository for PgChunkRepository {
    async fn insert(&self, chunk: NewChunk) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let dims = chunk.vector.len() as i32;
        sqlx::query(
            "INSERT INTO document_chunk (id, ingestion_id, owner_id, chunk_index, content,
                                         content_hash, provider, model, dims, vector)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(id)
        .bind(chunk.ingestion_id)
        .bind(chunk.owner_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.content)
        .bind(&chunk.content_hash)
        .bind(&chunk.scope.provider)
        .bind(&chunk.scope.model)
        .bind(dims)
        .bind(Vector::from(chunk.vector.clone()))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    async fn exists(
        &self,
        ingestion_id: Uuid,
        content_hash: &str,
        scope: &EmbeddingScope,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM document_chunk
                WHERE ingestion_id = $1 AND content_hash = $2
                  AND provider = $3 AND model = $4
             )",
        )
        .bind(ingestion_id)
        .bind(content_hash)
        .bind(&scope.provider)
        .bind(&scope.model)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(exists)
    }

    async fn find_similar(
        &self,
        owner_id: Uuid,
        scope: &EmbeddingScope,
        query: &[f32],
        threshold: f32,
        limit: i64,
    ) -> Result<Vec<ChunkHit>> {
        // The dims filter keeps the distance operator away from vectors of
        // a different length, which would otherwise error mid-scan.
        let rows = sqlx::query(
            "SELECT id, ingestion_id, content, provider, model,
                    1.0 - (vector <=> $1::vector) AS score
             FROM document_chunk
             WHERE owner_id = $2 AND provider = $3 AND model = $4 AND dims = $5
               AND 1.0 - (vector <=> $1::vector) >= $6
             ORDER BY vector <=> $1::vector
             LIMIT $7",
        )
        .bind(Vector::from(query.to_vec()))
        .bind(owner_id)
        .bind(&scope.provider)
        .bind(&scope.model)
        .bind(query.len() as i32)
        .bind(threshold as f64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let hits = rows
            .into_iter()
            .map(|row| ChunkHit {
                chunk_id: row.get("id"),
                ingestion_id: row.get("ingestion_id"),
                content: row.get("content"),
                similarity: row.get::<f64, _>("score") as f32,
                provider: row.get("provider"),
                model: row.get("model"),
            })
            .collect();

        Ok(hits)
    }

    async fn scope_history(&self, owner_id: Uuid) -> Result<Vec<EmbeddingScope>> {
        let rows = sqlx::query(
            "SELECT provider, model, MAX(created_at) AS last_used
             FROM document_chunk
             WHERE owner_id = $1
             GROUP BY provider, model
             ORDER BY last_used DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| EmbeddingScope {
                provider: row.get("provider"),
                model: row.get("model"),
            })
            .collect())
    }

    async fn delete_for_ingestion(&self, ingestion_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_chunk WHERE ingestion_id = $1")
            .bind(ingestion_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}

//! Bounded chunk-and-embed indexing.
//!
//! One indexer instance carries the process-default embedding scope
//! (resolved from the environment once, at construction) and a FIFO
//! semaphore capping concurrent indexing jobs. Within a job, chunks
//! embed strictly sequentially with a fixed pacing delay between
//! consecutive embedding calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use docflow_core::{
    defaults, ChunkRepository, EmbeddingScope, Error, LanguageModelService, NewChunk, Result,
};

use crate::chunker;

/// Outcome of one indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    /// Chunks produced by the splitter.
    pub chunk_count: usize,
    /// Chunks embedded and stored in this run.
    pub embedded: usize,
    /// Chunks skipped because identical content already exists in scope.
    pub skipped: usize,
}

/// Resolve the process-default embedding scope from the environment.
pub fn scope_from_env() -> EmbeddingScope {
    let provider = std::env::var(defaults::ENV_EMBED_PROVIDER)
        .unwrap_or_else(|_| defaults::EMBED_PROVIDER.to_string());
    let model = std::env::var(defaults::ENV_EMBED_MODEL)
        .unwrap_or_else(|_| defaults::EMBED_MODEL.to_string());
    EmbeddingScope::new(provider, model)
}

/// Resolve the concurrent-job cap from the environment. Never below 1.
pub fn job_concurrency_from_env() -> usize {
    std::env::var(defaults::ENV_EMBED_JOB_CONCURRENCY)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(defaults::EMBED_JOB_CONCURRENCY)
        .max(1)
}

/// Chunk-and-embed indexer.
pub struct ChunkIndexer {
    chunks: Arc<dyn ChunkRepository>,
    models: Arc<dyn LanguageModelService>,
    jobs: Arc<Semaphore>,
    scope: EmbeddingScope,
    max_chars: usize,
    pacing: Duration,
}

impl ChunkIndexer {
    /// Build an indexer with environment-resolved scope and concurrency.
    pub fn new(chunks: Arc<dyn ChunkRepository>, models: Arc<dyn LanguageModelService>) -> Self {
        Self {
            chunks,
            models,
            jobs: Arc::new(Semaphore::new(job_concurrency_from_env())),
            scope: scope_from_env(),
            max_chars: defaults::CHUNK_MAX_CHARS,
            pacing: Duration::from_millis(defaults::EMBED_PACING_MS),
        }
    }

    /// Override the embedding scope.
    pub fn with_scope(mut self, scope: EmbeddingScope) -> Self {
        self.scope = scope;
        self
    }

    /// Override the pacing delay between embedding calls.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Share a job semaphore across indexer instances.
    pub fn with_job_limit(mut self, jobs: Arc<Semaphore>) -> Self {
        self.jobs = jobs;
        self
    }

    /// The scope this indexer embeds under.
    pub fn scope(&self) -> &EmbeddingScope {
        &self.scope
    }

    /// Chunk a document's text, embed each chunk, and store the vectors.
    ///
    /// Blocks until a job slot frees. Chunks whose SHA-256 already exists
    /// in the same `(ingestion, provider, model)` scope are skipped without
    /// an embedding call.
    #[instrument(skip(self, text), fields(subsystem = "retrieval", component = "indexer", op = "index"))]
    pub async fn index_document(
        &self,
        ingestion_id: Uuid,
        owner_id: Uuid,
        text: &str,
    ) -> Result<IndexSummary> {
        let start = Instant::now();
        let pieces = chunker::chunk_text(text, self.max_chars);
        let mut summary = IndexSummary {
            chunk_count: pieces.len(),
            embedded: 0,
            skipped: 0,
        };
        if pieces.is_empty() {
            debug!(%ingestion_id, "No chunks produced, nothing to index");
            return Ok(summary);
        }

        let _permit = self
            .jobs
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("embedding job semaphore closed".to_string()))?;

        for (index, content) in pieces.into_iter().enumerate() {
            let content_hash = hex::encode(Sha256::digest(content.as_bytes()));

            if self
                .chunks
                .exists(ingestion_id, &content_hash, &self.scope)
                .await?
            {
                debug!(
                    %ingestion_id,
                    chunk_index = index,
                    "Chunk content already embedded in scope, skipping"
                );
                summary.skipped += 1;
                continue;
            }

            if summary.embedded > 0 {
                tokio::time::sleep(self.pacing).await;
            }

            let vector = self.models.embed(&content, &self.scope).await?;
            self.chunks
                .insert(NewChunk {
                    ingestion_id,
                    owner_id,
                    chunk_index: index as i32,
                    content,
                    content_hash,
                    scope: self.scope.clone(),
                    vector,
                })
                .await?;
            summary.embedded += 1;
        }

        info!(
            %ingestion_id,
            embed_provider = %self.scope.provider,
            embed_model = %self.scope.model,
            chunk_count = summary.chunk_count,
            embedded = summary.embedded,
            skipped = summary.skipped,
            duration_ms = start.elapsed().as_millis() as u64,
            "Document indexed"
        );
        Ok(summary)
    }

    /// Drop every existing chunk for the ingestion, then index from scratch.
    ///
    /// Used on re-runs where the document text may have changed.
    pub async fn reindex_document(
        &self,
        ingestion_id: Uuid,
        owner_id: Uuid,
        text: &str,
    ) -> Result<IndexSummary> {
        let removed = self.chunks.delete_for_ingestion(ingestion_id).await?;
        debug!(%ingestion_id, removed, "Cleared existing chunks before reindex");
        self.index_document(ingestion_id, owner_id, text).await
    }
}

//! Scope-aware semantic search over the chunk store.
//!
//! A search runs against the caller's preferred `(provider, model)` scope
//! first, retrying once at a relaxed threshold when nothing clears the
//! preferred one. If the preferred scope yields nothing at all, the
//! owner's scope history (most recent first) is walked with the same
//! two-threshold pass per scope until enough results accumulate.
//!
//! The query embeds at most once per scope within a single search. A
//! scope whose stored vectors have a different dimensionality than the
//! query embedding contributes nothing: the store excludes mismatched
//! rows rather than erroring.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use docflow_core::{
    defaults, ChunkHit, ChunkRepository, EmbeddingScope, LanguageModelService, Result,
};

/// Relaxed-retry threshold: `max(floor, min(threshold, cap))`.
///
/// Only meaningful when the result is lower than the preferred threshold;
/// callers skip the retry otherwise.
pub fn relaxed_threshold(threshold: f32) -> f32 {
    defaults::SEARCH_RELAXED_FLOOR
        .max(defaults::SEARCH_RELAXED_CAP.min(threshold))
}

/// Semantic search engine.
pub struct SemanticSearch {
    chunks: Arc<dyn ChunkRepository>,
    models: Arc<dyn LanguageModelService>,
}

impl SemanticSearch {
    pub fn new(chunks: Arc<dyn ChunkRepository>, models: Arc<dyn LanguageModelService>) -> Self {
        Self { chunks, models }
    }

    /// Find up to `limit` chunks similar to `query` for this owner.
    ///
    /// Results are deduplicated by chunk id (keeping the higher similarity)
    /// and sorted descending. A model-service outage degrades to an empty
    /// result rather than an error; store failures propagate.
    #[instrument(skip(self, query), fields(subsystem = "retrieval", component = "search", op = "search"))]
    pub async fn search(
        &self,
        owner_id: Uuid,
        query: &str,
        scope: &EmbeddingScope,
        threshold: f32,
        limit: i64,
    ) -> Result<Vec<ChunkHit>> {
        let start = Instant::now();
        let mut cache: HashMap<EmbeddingScope, Vec<f32>> = HashMap::new();

        let mut hits = self
            .scope_pass(owner_id, scope, query, threshold, limit, &mut cache)
            .await?;

        if hits.is_empty() {
            for fallback in self.chunks.scope_history(owner_id).await? {
                if fallback == *scope {
                    continue;
                }
                let more = self
                    .scope_pass(owner_id, &fallback, query, threshold, limit, &mut cache)
                    .await?;
                hits.extend(more);
                if hits.len() >= limit as usize {
                    break;
                }
            }
        }

        // Dedup by chunk id, keeping the higher similarity.
        let mut best: HashMap<Uuid, ChunkHit> = HashMap::new();
        for hit in hits {
            match best.get(&hit.chunk_id) {
                Some(kept) if kept.similarity >= hit.similarity => {}
                _ => {
                    best.insert(hit.chunk_id, hit);
                }
            }
        }
        let mut results: Vec<ChunkHit> = best.into_values().collect();
        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit as usize);

        info!(
            %owner_id,
            embed_provider = %scope.provider,
            embed_model = %scope.model,
            threshold,
            result_count = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Semantic search complete"
        );
        Ok(results)
    }

    /// One scope's two-threshold pass.
    async fn scope_pass(
        &self,
        owner_id: Uuid,
        scope: &EmbeddingScope,
        query: &str,
        threshold: f32,
        limit: i64,
        cache: &mut HashMap<EmbeddingScope, Vec<f32>>,
    ) -> Result<Vec<ChunkHit>> {
        let vector = match self.query_embedding(query, scope, cache).await {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };

        let hits = self
            .chunks
            .find_similar(owner_id, scope, &vector, threshold, limit)
            .await?;
        if !hits.is_empty() {
            debug!(
                embed_provider = %scope.provider,
                embed_model = %scope.model,
                threshold,
                result_count = hits.len(),
                "Scope pass hit at preferred threshold"
            );
            return Ok(hits);
        }

        let relaxed = relaxed_threshold(threshold);
        if relaxed >= threshold {
            return Ok(hits);
        }
        debug!(
            embed_provider = %scope.provider,
            embed_model = %scope.model,
            threshold = relaxed,
            "No hits at preferred threshold, retrying relaxed"
        );
        self.chunks
            .find_similar(owner_id, scope, &vector, relaxed, limit)
            .await
    }

    /// Embed the query once per scope. An embedding failure logs and
    /// degrades to `None`, which skips the scope.
    async fn query_embedding(
        &self,
        query: &str,
        scope: &EmbeddingScope,
        cache: &mut HashMap<EmbeddingScope, Vec<f32>>,
    ) -> Option<Vec<f32>> {
        if let Some(vector) = cache.get(scope) {
            return Some(vector.clone());
        }
        match self.models.embed(query, scope).await {
            Ok(vector) => {
                cache.insert(scope.clone(), vector.clone());
                Some(vector)
            }
            Err(e) => {
                warn!(
                    embed_provider = %scope.provider,
                    embed_model = %scope.model,
                    error = %e,
                    "Query embedding failed, skipping scope"
                );
                None
            }
        }
    }
}

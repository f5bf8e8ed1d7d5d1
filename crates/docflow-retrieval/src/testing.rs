//! In-memory chunk store and vector helpers shared by this crate's tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use docflow_core::{ChunkHit, ChunkRepository, EmbeddingScope, NewChunk, Result};
use docflow_inference::mock::MockEmbeddingGenerator;

/// One stored row.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: Uuid,
    pub ingestion_id: Uuid,
    pub owner_id: Uuid,
    pub chunk_index: i32,
    pub content: String,
    pub content_hash: String,
    pub scope: EmbeddingScope,
    pub vector: Vec<f32>,
}

/// Chunk store backed by a `Vec`, with linear-scan cosine search.
///
/// Rows keep insertion order, which doubles as recency for
/// `scope_history`.
pub struct MemChunkRepository {
    rows: Mutex<Vec<StoredChunk>>,
    search_calls: AtomicUsize,
}

impl MemChunkRepository {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            search_calls: AtomicUsize::new(0),
        }
    }

    /// Insert a row verbatim, bypassing id generation.
    pub fn insert_raw(&self, row: StoredChunk) -> Uuid {
        let id = row.id;
        self.rows.lock().unwrap().push(row);
        id
    }

    pub fn rows(&self) -> Vec<StoredChunk> {
        self.rows.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// Number of `find_similar` calls so far.
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemChunkRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkRepository for MemChunkRepository {
    async fn insert(&self, chunk: NewChunk) -> Result<Uuid> {
        let id = Uuid::now_v7();
        self.rows.lock().unwrap().push(StoredChunk {
            id,
            ingestion_id: chunk.ingestion_id,
            owner_id: chunk.owner_id,
            chunk_index: chunk.chunk_index,
            content: chunk.content,
            content_hash: chunk.content_hash,
            scope: chunk.scope,
            vector: chunk.vector,
        });
        Ok(id)
    }

    async fn exists(
        &self,
        ingestion_id: Uuid,
        content_hash: &str,
        scope: &EmbeddingScope,
    ) -> Result<bool> {
        Ok(self.rows.lock().unwrap().iter().any(|r| {
            r.ingestion_id == ingestion_id && r.content_hash == content_hash && r.scope == *scope
        }))
    }

    async fn find_similar(
        &self,
        owner_id: Uuid,
        scope: &EmbeddingScope,
        query: &[f32],
        threshold: f32,
        limit: i64,
    ) -> Result<Vec<ChunkHit>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let mut hits: Vec<ChunkHit> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.owner_id == owner_id && r.scope == *scope && r.vector.len() == query.len()
            })
            .map(|r| ChunkHit {
                chunk_id: r.id,
                ingestion_id: r.ingestion_id,
                content: r.content.clone(),
                similarity: MockEmbeddingGenerator::cosine_similarity(&r.vector, query),
                provider: r.scope.provider.clone(),
                model: r.scope.model.clone(),
            })
            .filter(|h| h.similarity >= threshold)
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn scope_history(&self, owner_id: Uuid) -> Result<Vec<EmbeddingScope>> {
        let rows = self.rows.lock().unwrap();
        let mut scopes: Vec<EmbeddingScope> = Vec::new();
        for row in rows.iter().rev() {
            if row.owner_id == owner_id && !scopes.contains(&row.scope) {
                scopes.push(row.scope.clone());
            }
        }
        Ok(scopes)
    }

    async fn delete_for_ingestion(&self, ingestion_id: Uuid) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| r.ingestion_id != ingestion_id);
        Ok((before - rows.len()) as u64)
    }
}

/// Build a unit vector at exactly the requested cosine to `query`.
///
/// `query` must be a unit vector (the mock generator always produces one).
pub fn with_similarity(query: &[f32], similarity: f32) -> Vec<f32> {
    // Orthogonalize the axis least aligned with the query.
    let idx = query
        .iter()
        .enumerate()
        .min_by(|a, b| {
            a.1.abs()
                .partial_cmp(&b.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap();
    let mut ortho = vec![0.0_f32; query.len()];
    ortho[idx] = 1.0;
    let dot = query[idx];
    for (o, q) in ortho.iter_mut().zip(query) {
        *o -= dot * q;
    }
    let norm: f32 = ortho.iter().map(|x| x * x).sum::<f32>().sqrt();
    for o in ortho.iter_mut() {
        *o /= norm;
    }

    let sine = (1.0 - similarity * similarity).sqrt();
    query
        .iter()
        .zip(&ortho)
        .map(|(q, o)| similarity * q + sine * o)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_similarity_hits_target_cosine() {
        let query = MockEmbeddingGenerator::generate("reference text", 16);
        for target in [0.95_f32, 0.6, 0.3, 0.0] {
            let v = with_similarity(&query, target);
            let sim = MockEmbeddingGenerator::cosine_similarity(&query, &v);
            assert!(
                (sim - target).abs() < 1e-4,
                "wanted {target}, got {sim}"
            );
        }
    }

    #[tokio::test]
    async fn test_scope_history_most_recent_first() {
        let repo = MemChunkRepository::new();
        let owner = Uuid::new_v4();
        for (i, model) in ["first", "second"].iter().enumerate() {
            repo.insert_raw(StoredChunk {
                id: Uuid::now_v7(),
                ingestion_id: Uuid::now_v7(),
                owner_id: owner,
                chunk_index: i as i32,
                content: "x".to_string(),
                content_hash: format!("h{i}"),
                scope: EmbeddingScope::new("mock", *model),
                vector: vec![1.0, 0.0],
            });
        }

        let history = repo.scope_history(owner).await.unwrap();
        let models: Vec<&str> = history.iter().map(|s| s.model.as_str()).collect();
        assert_eq!(models, vec!["second", "first"]);
    }
}

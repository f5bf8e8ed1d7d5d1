//! # docflow-retrieval
//!
//! Chunking, embedding, and semantic search over ingested documents.
//!
//! This crate provides:
//! - Paragraph-oriented text chunking with hard splits for oversize
//!   paragraphs (`chunker`)
//! - A bounded chunk-and-embed indexer with content-hash deduplication
//!   and paced embedding calls (`ChunkIndexer`)
//! - A scope-aware semantic search engine with relaxed-threshold retry
//!   and scope-history fallback (`SemanticSearch`)
//!
//! Vectors are stored per `(provider, model)` embedding scope so that
//! chunks from different embedding models never compare against each
//! other.

pub mod chunker;
pub mod indexer;
pub mod search;

#[cfg(test)]
mod testing;

pub use chunker::{chunk_document, chunk_text};
pub use indexer::{job_concurrency_from_env, scope_from_env, ChunkIndexer, IndexSummary};
pub use search::{relaxed_threshold, SemanticSearch};

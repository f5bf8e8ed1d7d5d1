//! Core traits for docflow abstractions.
//!
//! These traits define the narrow contracts the pipeline consumes,
//! enabling pluggable backends and testability. Production implementations
//! live in `docflow-db` (store) and `docflow-inference` (model service).

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// LANGUAGE MODEL SERVICE
// =============================================================================

/// The language-model collaborator: chat completion, embeddings, provider
/// discovery, liveness.
///
/// Every call site must tolerate this service being unavailable: extraction
/// degrades to empty entities, semantic conditions to non-match, capability
/// reads to `unknown`.
#[async_trait]
pub trait LanguageModelService: Send + Sync {
    /// Run a chat completion and return the raw reply text.
    async fn chat_complete(&self, messages: &[ChatMessage], opts: &ChatOptions)
        -> Result<String>;

    /// Embed a single text under the given scope.
    async fn embed(&self, text: &str, scope: &EmbeddingScope) -> Result<Vec<f32>>;

    /// List providers and the chat models each exposes.
    async fn list_chat_providers(&self) -> Result<Vec<ProviderModels>>;

    /// Liveness probe. Returns `Ok(true)` when the service is reachable.
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// INGESTION REPOSITORY
// =============================================================================

/// Repository for ingestion rows.
#[async_trait]
pub trait IngestionRepository: Send + Sync {
    /// Insert a new ingestion.
    async fn insert(&self, req: CreateIngestionRequest) -> Result<Uuid>;

    /// Fetch an ingestion by id.
    async fn get(&self, id: Uuid) -> Result<Ingestion>;

    /// List an owner's ingestions, newest first, optionally filtered by status.
    async fn list(
        &self,
        owner_id: Uuid,
        status: Option<IngestionStatus>,
        limit: i64,
    ) -> Result<Vec<Ingestion>>;

    /// Find an owner's most recent non-`error` ingestion with this content hash.
    async fn find_by_content_hash(
        &self,
        owner_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<Ingestion>>;

    /// Set status and optional error message.
    async fn set_status(
        &self,
        id: Uuid,
        status: IngestionStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Persist baseline entities (and optional summary) independent of the
    /// later policy outcome.
    async fn store_entities(
        &self,
        id: Uuid,
        entities: &serde_json::Value,
        summary: Option<&str>,
    ) -> Result<()>;

    /// Persist the extracted document text for re-runs and indexing.
    async fn store_document_text(&self, id: Uuid, text: &str) -> Result<()>;

    /// Apply a terminal run outcome.
    async fn record_outcome(&self, id: Uuid, outcome: IngestionOutcome) -> Result<()>;

    /// Append steps to the trace without replacing existing history.
    async fn append_trace(&self, id: Uuid, steps: &[TraceStep]) -> Result<()>;

    /// Add tags, deduplicated against existing ones.
    async fn add_tags(&self, id: Uuid, tags: &[String]) -> Result<()>;

    /// Reset extraction-derived fields for a re-run. Preserves tags and trace;
    /// returns the refreshed row.
    async fn reset_for_rerun(&self, id: Uuid) -> Result<Ingestion>;
}

// =============================================================================
// POLICY REPOSITORY
// =============================================================================

/// Repository for policy CRUD.
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Create a policy and return its id.
    async fn create(&self, req: CreatePolicyRequest) -> Result<Uuid>;

    /// Fetch a policy by id.
    async fn get(&self, id: Uuid) -> Result<Policy>;

    /// List all of an owner's policies, ascending priority.
    async fn list(&self, owner_id: Uuid) -> Result<Vec<Policy>>;

    /// List an owner's enabled policies, ascending priority.
    async fn list_enabled(&self, owner_id: Uuid) -> Result<Vec<Policy>>;

    /// Partially update a policy.
    async fn update(&self, id: Uuid, update: PolicyUpdate) -> Result<()>;

    /// Delete a policy.
    async fn delete(&self, id: Uuid) -> Result<()>;
}

// =============================================================================
// CHUNK REPOSITORY
// =============================================================================

/// Repository for content-addressed chunk vectors.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Insert a chunk row.
    async fn insert(&self, chunk: NewChunk) -> Result<Uuid>;

    /// Check whether this content hash already exists in the same
    /// `(ingestion, provider, model)` scope.
    async fn exists(
        &self,
        ingestion_id: Uuid,
        content_hash: &str,
        scope: &EmbeddingScope,
    ) -> Result<bool>;

    /// Similarity search within one scope. Rows whose stored dimensionality
    /// differs from `query.len()` are excluded.
    async fn find_similar(
        &self,
        owner_id: Uuid,
        scope: &EmbeddingScope,
        query: &[f32],
        threshold: f32,
        limit: i64,
    ) -> Result<Vec<ChunkHit>>;

    /// Every scope the owner has ever stored chunks under, most recent first.
    async fn scope_history(&self, owner_id: Uuid) -> Result<Vec<EmbeddingScope>>;

    /// Delete all chunks for an ingestion (all scopes). Returns rows removed.
    async fn delete_for_ingestion(&self, ingestion_id: Uuid) -> Result<u64>;
}

// =============================================================================
// CAPABILITY REPOSITORY
// =============================================================================

/// Store for learned vision-capability records.
#[async_trait]
pub trait CapabilityRepository: Send + Sync {
    /// Fetch a record by capability key, expired or not. Callers apply
    /// expiry-as-read semantics.
    async fn get(&self, key: &str) -> Result<Option<VisionCapabilityRecord>>;

    /// Insert or replace a record by key.
    async fn upsert(&self, record: &VisionCapabilityRecord) -> Result<()>;

    /// Remove a record.
    async fn delete(&self, key: &str) -> Result<()>;
}

// =============================================================================
// FEEDBACK REPOSITORY
// =============================================================================

/// Store for policy-match feedback rows.
#[async_trait]
pub trait FeedbackRepository: Send + Sync {
    /// Upsert by `(owner, ingestion, policy)`; returns the row id.
    async fn upsert(&self, feedback: NewPolicyFeedback) -> Result<Uuid>;

    /// Fetch an owner's feedback rows, newest first.
    async fn list_for_owner(&self, owner_id: Uuid, limit: i64) -> Result<Vec<PolicyFeedback>>;
}

// =============================================================================
// WORK QUEUE
// =============================================================================

/// Heavy-path hand-off: the external OCR/vision worker consumes these
/// descriptors and writes results back to the ingestion out-of-band.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue_ocr(&self, job: OcrJobDescriptor) -> Result<()>;
}

/// Work queue that accepts and drops every job. Test default.
pub struct NoOpWorkQueue;

#[async_trait]
impl WorkQueue for NoOpWorkQueue {
    async fn enqueue_ocr(&self, _job: OcrJobDescriptor) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// REMOTE STORAGE
// =============================================================================

/// External storage/spreadsheet collaborator backing `copy_to_gdrive` and
/// `append_to_google_sheet` actions.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Upload a local file into a remote folder; returns a remote reference.
    async fn upload_file(&self, local_path: &str, remote_folder: &str) -> Result<String>;

    /// Append one row of cells to a spreadsheet.
    async fn append_sheet_row(&self, sheet_id: &str, values: &[String]) -> Result<()>;
}

/// Remote storage that accepts everything without side effects. Test default.
pub struct NoOpRemoteStorage;

#[async_trait]
impl RemoteStorage for NoOpRemoteStorage {
    async fn upload_file(&self, local_path: &str, _remote_folder: &str) -> Result<String> {
        Ok(format!("noop://{}", local_path))
    }

    async fn append_sheet_row(&self, _sheet_id: &str, _values: &[String]) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// EVENT SINK
// =============================================================================

/// Best-effort structured event log. Callers spawn these non-blocking; a
/// sink failure must never fail the operation that emitted the event.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn log_event(&self, event: PipelineEvent) -> Result<()>;
}

/// Event sink that drops every event. Test default.
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn log_event(&self, _event: PipelineEvent) -> Result<()> {
        Ok(())
    }
}

//! In-memory collaborators shared by this crate's tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use docflow_core::{
    ChunkHit, ChunkRepository, CreateIngestionRequest, CreatePolicyRequest, EmbeddingScope, Error,
    EventSink, Ingestion, IngestionOutcome, IngestionRepository, IngestionStatus, NewChunk,
    OcrJobDescriptor, PipelineEvent, Policy, PolicyRepository, PolicyUpdate, Result, TraceStep,
    WorkQueue,
};

/// Ingestion store backed by a `Vec`, insertion order doubles as recency.
pub struct MemIngestionRepository {
    rows: Mutex<Vec<Ingestion>>,
}

impl MemIngestionRepository {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
        }
    }

    pub fn insert_raw(&self, row: Ingestion) {
        self.rows.lock().unwrap().push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn with_row<T>(&self, id: Uuid, f: impl FnOnce(&mut Ingestion) -> T) -> Result<T> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(Error::IngestionNotFound(id))?;
        let value = f(row);
        row.updated_at = Utc::now();
        Ok(value)
    }
}

impl Default for MemIngestionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IngestionRepository for MemIngestionRepository {
    async fn insert(&self, req: CreateIngestionRequest) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        self.rows.lock().unwrap().push(Ingestion {
            id,
            owner_id: req.owner_id,
            source: req.source,
            filename: req.filename,
            mime_type: req.mime_type,
            size_bytes: req.size_bytes,
            content_hash: req.content_hash,
            status: req.status,
            matched_policy_id: None,
            matched_policy_name: None,
            extracted_fields: JsonValue::Object(Default::default()),
            actions_executed: JsonValue::Array(Vec::new()),
            error_message: None,
            trace: req.trace,
            tags: Vec::new(),
            summary: None,
            document_text: None,
            file_path: req.file_path,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Ingestion> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(Error::IngestionNotFound(id))
    }

    async fn list(
        &self,
        owner_id: Uuid,
        status: Option<IngestionStatus>,
        limit: i64,
    ) -> Result<Vec<Ingestion>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|r| r.owner_id == owner_id && status.map(|s| r.status == s).unwrap_or(true))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_by_content_hash(
        &self,
        owner_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<Ingestion>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| {
                r.owner_id == owner_id
                    && r.content_hash == content_hash
                    && r.status != IngestionStatus::Error
            })
            .cloned())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: IngestionStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.with_row(id, |r| {
            r.status = status;
            r.error_message = error_message.map(str::to_string);
        })
    }

    async fn store_entities(
        &self,
        id: Uuid,
        entities: &JsonValue,
        summary: Option<&str>,
    ) -> Result<()> {
        self.with_row(id, |r| {
            r.extracted_fields = entities.clone();
            if let Some(s) = summary {
                r.summary = Some(s.to_string());
            }
        })
    }

    async fn store_document_text(&self, id: Uuid, text: &str) -> Result<()> {
        self.with_row(id, |r| r.document_text = Some(text.to_string()))
    }

    async fn record_outcome(&self, id: Uuid, outcome: IngestionOutcome) -> Result<()> {
        self.with_row(id, |r| {
            if let Some(status) = outcome.status {
                r.status = status;
            }
            if outcome.matched_policy_id.is_some() {
                r.matched_policy_id = outcome.matched_policy_id;
            }
            if outcome.matched_policy_name.is_some() {
                r.matched_policy_name = outcome.matched_policy_name;
            }
            if let Some(fields) = outcome.extracted_fields {
                r.extracted_fields = fields;
            }
            if let Some(actions) = outcome.actions_executed {
                r.actions_executed = actions;
            }
            if outcome.error_message.is_some() {
                r.error_message = outcome.error_message;
            }
            if outcome.summary.is_some() {
                r.summary = outcome.summary;
            }
        })
    }

    async fn append_trace(&self, id: Uuid, steps: &[TraceStep]) -> Result<()> {
        self.with_row(id, |r| r.trace.extend_from_slice(steps))
    }

    async fn add_tags(&self, id: Uuid, tags: &[String]) -> Result<()> {
        self.with_row(id, |r| {
            for tag in tags {
                if !r.tags.contains(tag) {
                    r.tags.push(tag.clone());
                }
            }
        })
    }

    async fn reset_for_rerun(&self, id: Uuid) -> Result<Ingestion> {
        self.with_row(id, |r| {
            r.status = IngestionStatus::Processing;
            r.matched_policy_id = None;
            r.matched_policy_name = None;
            r.extracted_fields = JsonValue::Object(Default::default());
            r.actions_executed = JsonValue::Array(Vec::new());
            r.error_message = None;
            r.summary = None;
            r.clone()
        })
    }
}

/// Policy store over a fixed row list.
pub struct MemPolicyRepository {
    rows: Mutex<Vec<Policy>>,
}

impl MemPolicyRepository {
    pub fn new(rows: Vec<Policy>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }
}

#[async_trait]
impl PolicyRepository for MemPolicyRepository {
    async fn create(&self, _req: CreatePolicyRequest) -> Result<Uuid> {
        Ok(Uuid::new_v4())
    }

    async fn get(&self, id: Uuid) -> Result<Policy> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(Error::PolicyNotFound(id))
    }

    async fn list(&self, owner_id: Uuid) -> Result<Vec<Policy>> {
        let mut rows: Vec<Policy> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.priority);
        Ok(rows)
    }

    async fn list_enabled(&self, owner_id: Uuid) -> Result<Vec<Policy>> {
        let mut rows: Vec<Policy> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.owner_id == owner_id && p.enabled)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.priority);
        Ok(rows)
    }

    async fn update(&self, _id: Uuid, _update: PolicyUpdate) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _id: Uuid) -> Result<()> {
        Ok(())
    }
}

/// Work queue that records every descriptor.
pub struct RecordingQueue {
    jobs: Mutex<Vec<OcrJobDescriptor>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn jobs(&self) -> Vec<OcrJobDescriptor> {
        self.jobs.lock().unwrap().clone()
    }
}

impl Default for RecordingQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for RecordingQueue {
    async fn enqueue_ocr(&self, job: OcrJobDescriptor) -> Result<()> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

/// Event sink that records event kinds.
pub struct RecordingSink {
    kinds: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            kinds: Mutex::new(Vec::new()),
        }
    }

    pub fn kinds(&self) -> Vec<String> {
        self.kinds.lock().unwrap().clone()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn log_event(&self, event: PipelineEvent) -> Result<()> {
        self.kinds.lock().unwrap().push(event.kind);
        Ok(())
    }
}

/// Chunk store that accepts everything and finds nothing.
pub struct NullChunkRepository;

#[async_trait]
impl ChunkRepository for NullChunkRepository {
    async fn insert(&self, _chunk: NewChunk) -> Result<Uuid> {
        Ok(Uuid::now_v7())
    }

    async fn exists(
        &self,
        _ingestion_id: Uuid,
        _content_hash: &str,
        _scope: &EmbeddingScope,
    ) -> Result<bool> {
        Ok(false)
    }

    async fn find_similar(
        &self,
        _owner_id: Uuid,
        _scope: &EmbeddingScope,
        _query: &[f32],
        _threshold: f32,
        _limit: i64,
    ) -> Result<Vec<ChunkHit>> {
        Ok(Vec::new())
    }

    async fn scope_history(&self, _owner_id: Uuid) -> Result<Vec<EmbeddingScope>> {
        Ok(Vec::new())
    }

    async fn delete_for_ingestion(&self, _ingestion_id: Uuid) -> Result<u64> {
        Ok(0)
    }
}

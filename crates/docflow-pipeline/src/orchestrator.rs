//! Ingestion orchestrator: the end-to-end per-document flow.
//!
//! One call to [`Orchestrator::ingest`] takes a document from raw bytes to a
//! terminal status: duplicate short-circuit, triage, baseline extraction,
//! policy evaluation with actions, outcome persistence, and fire-and-forget
//! semantic indexing. Heavy-path documents stop at `pending` after the
//! work-queue hand-off; the OCR worker writes back out-of-band and re-enters
//! through [`Orchestrator::rerun`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use docflow_core::{
    defaults, CreateIngestionRequest, Error, EventSink, IngestionOutcome, IngestionRepository,
    IngestionStatus, LanguageModelService, OcrJobDescriptor, PipelineEvent, Result, SourceKind,
    TraceStep, WorkQueue,
};
use docflow_policy::{
    append_extracted_section, baseline_extract, ActionContext, DocumentView, EngineStatus,
    PolicyCache, PolicyEngine,
};
use docflow_retrieval::ChunkIndexer;

use crate::triage::{self, TriageRoute};

/// One document handed to the pipeline.
#[derive(Debug, Clone)]
pub struct IncomingDocument {
    pub owner_id: Uuid,
    pub source: SourceKind,
    pub filename: String,
    /// Declared MIME type; corrected by byte sniffing where magic bytes
    /// say otherwise.
    pub mime_type: String,
    pub data: Vec<u8>,
    /// Where the caller stored the original, when it did.
    pub file_path: Option<PathBuf>,
}

/// What one pipeline run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub ingestion_id: Uuid,
    pub status: IngestionStatus,
    pub matched_policy_name: Option<String>,
    pub error_message: Option<String>,
}

/// Hex-encoded SHA-256 of the raw document bytes.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Drives documents through triage, extraction, policies, and indexing.
pub struct Orchestrator {
    ingestions: Arc<dyn IngestionRepository>,
    policies: PolicyCache,
    engine: Arc<PolicyEngine>,
    models: Arc<dyn LanguageModelService>,
    indexer: Arc<ChunkIndexer>,
    queue: Arc<dyn WorkQueue>,
    events: Arc<dyn EventSink>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ingestions: Arc<dyn IngestionRepository>,
        policies: PolicyCache,
        engine: Arc<PolicyEngine>,
        models: Arc<dyn LanguageModelService>,
        indexer: Arc<ChunkIndexer>,
        queue: Arc<dyn WorkQueue>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            ingestions,
            policies,
            engine,
            models,
            indexer,
            queue,
            events,
        }
    }

    /// Run one document through the pipeline.
    #[instrument(skip_all, fields(subsystem = "pipeline", component = "orchestrator", op = "ingest", owner_id = %doc.owner_id, filename = %doc.filename, size = doc.data.len()))]
    pub async fn ingest(&self, doc: IncomingDocument) -> Result<PipelineOutcome> {
        let content_hash = content_hash(&doc.data);
        let mime_type = triage::sniff_mime(&doc.data, &doc.mime_type);
        let file_path_str = doc
            .file_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        // Same owner, same bytes: a distinct terminal status, not an error.
        if let Some(existing) = self
            .ingestions
            .find_by_content_hash(doc.owner_id, &content_hash)
            .await?
        {
            let id = self
                .ingestions
                .insert(CreateIngestionRequest {
                    owner_id: doc.owner_id,
                    source: doc.source,
                    filename: doc.filename.clone(),
                    mime_type,
                    size_bytes: doc.data.len() as i64,
                    content_hash,
                    status: IngestionStatus::Duplicate,
                    file_path: file_path_str,
                    trace: vec![TraceStep::new(
                        "intake",
                        format!("Duplicate of ingestion {}", existing.id),
                    )],
                })
                .await?;
            info!(%id, original = %existing.id, "Duplicate content, short-circuiting");
            self.emit(
                Some(id),
                doc.owner_id,
                "ingestion.duplicate",
                "intake",
                json!({ "original_ingestion_id": existing.id }),
            );
            return Ok(PipelineOutcome {
                ingestion_id: id,
                status: IngestionStatus::Duplicate,
                matched_policy_name: None,
                error_message: None,
            });
        }

        let id = self
            .ingestions
            .insert(CreateIngestionRequest {
                owner_id: doc.owner_id,
                source: doc.source,
                filename: doc.filename.clone(),
                mime_type: mime_type.clone(),
                size_bytes: doc.data.len() as i64,
                content_hash,
                status: IngestionStatus::Processing,
                file_path: file_path_str.clone(),
                trace: vec![TraceStep::new(
                    "intake",
                    format!(
                        "Received {} ({} bytes) from {}",
                        doc.filename,
                        doc.data.len(),
                        doc.source.as_str()
                    ),
                )],
            })
            .await?;
        self.emit(
            Some(id),
            doc.owner_id,
            "ingestion.received",
            "intake",
            json!({ "filename": doc.filename }),
        );

        let text = match triage::route(&doc.filename, &doc.data).await {
            TriageRoute::FastPath { text } => text,
            TriageRoute::HeavyPath { reason } => {
                self.ingestions
                    .append_trace(id, &[TraceStep::new("triage", format!("Heavy path: {reason}"))])
                    .await?;
                self.ingestions
                    .set_status(id, IngestionStatus::Pending, None)
                    .await?;
                self.queue
                    .enqueue_ocr(OcrJobDescriptor {
                        owner_id: doc.owner_id,
                        filename: doc.filename.clone(),
                        mime_type: mime_type.clone(),
                        size_bytes: doc.data.len() as i64,
                        path: file_path_str.unwrap_or_default(),
                        ingestion_id: id,
                    })
                    .await?;
                info!(%id, reason, "Handed off to the OCR worker");
                self.emit(
                    Some(id),
                    doc.owner_id,
                    "ingestion.ocr_queued",
                    "triage",
                    json!({ "reason": reason }),
                );
                return Ok(PipelineOutcome {
                    ingestion_id: id,
                    status: IngestionStatus::Pending,
                    matched_policy_name: None,
                    error_message: None,
                });
            }
        };
        self.ingestions
            .append_trace(
                id,
                &[TraceStep::new("triage", "Fast path: text extracted inline")],
            )
            .await?;
        self.ingestions.store_document_text(id, &text).await?;

        self.process_text(id, doc.owner_id, &doc.filename, &mime_type, doc.file_path, &text)
            .await
    }

    /// Re-run extraction and policy evaluation over the stored text.
    ///
    /// Tags and trace history survive; extraction-derived fields reset.
    #[instrument(skip(self), fields(subsystem = "pipeline", component = "orchestrator", op = "rerun", ingestion_id = %ingestion_id))]
    pub async fn rerun(&self, ingestion_id: Uuid) -> Result<PipelineOutcome> {
        let ingestion = self.ingestions.reset_for_rerun(ingestion_id).await?;
        let text = ingestion.document_text.clone().ok_or_else(|| {
            Error::InvalidInput(format!(
                "ingestion {ingestion_id} has no stored text to re-run"
            ))
        })?;
        self.ingestions
            .append_trace(
                ingestion_id,
                &[TraceStep::new(
                    "rerun",
                    "Re-running extraction and policy evaluation",
                )],
            )
            .await?;
        self.emit(
            Some(ingestion_id),
            ingestion.owner_id,
            "ingestion.rerun",
            "intake",
            json!({}),
        );
        self.process_text(
            ingestion_id,
            ingestion.owner_id,
            &ingestion.filename,
            &ingestion.mime_type,
            ingestion.file_path.as_ref().map(PathBuf::from),
            &text,
        )
        .await
    }

    /// Steps shared by first runs and re-runs: baseline extraction, policy
    /// evaluation, outcome persistence, indexing.
    async fn process_text(
        &self,
        id: Uuid,
        owner_id: Uuid,
        filename: &str,
        mime_type: &str,
        file_path: Option<PathBuf>,
        text: &str,
    ) -> Result<PipelineOutcome> {
        let mut trace = Vec::new();
        let opts = self.engine.chat_options().clone();

        let baseline = baseline_extract(
            text,
            None,
            &defaults::baseline_fields(),
            self.models.as_ref(),
            &opts,
        )
        .await;
        trace.push(TraceStep::new(
            "extraction",
            format!(
                "Baseline extraction produced {} fields ({} uncertain)",
                baseline.entities.len(),
                baseline.uncertain_fields.len()
            ),
        ));
        self.ingestions
            .store_entities(id, &JsonValue::Object(baseline.entities.clone()), None)
            .await?;
        self.emit(
            Some(id),
            owner_id,
            "ingestion.extracted",
            "extraction",
            json!({ "field_count": baseline.entities.len() }),
        );

        // Matching sees normalized field values too.
        let working_text = append_extracted_section(text, &baseline.entities);

        let policies = self.policies.enabled_for_owner(owner_id).await?;
        let view = DocumentView {
            filename,
            mime_type,
            text: &working_text,
        };
        let mut ctx = ActionContext {
            ingestion_id: id,
            owner_id,
            filename: filename.to_string(),
            document_path: file_path,
            vars: HashMap::new(),
        };
        let outcome = self
            .engine
            .evaluate(policies.as_slice(), view, &baseline.entities, &mut ctx, &mut trace)
            .await;

        let (status, error_message) = match outcome.status {
            EngineStatus::Matched => (IngestionStatus::Matched, outcome.action_error.clone()),
            EngineStatus::Fallback => (IngestionStatus::NoMatch, None),
            EngineStatus::MissingFields => {
                (IngestionStatus::Error, outcome.missing_fields_message())
            }
        };
        self.ingestions
            .record_outcome(
                id,
                IngestionOutcome {
                    status: Some(status),
                    matched_policy_id: outcome.policy_id,
                    matched_policy_name: outcome.policy_name.clone(),
                    extracted_fields: Some(JsonValue::Object(outcome.fields.clone())),
                    actions_executed: Some(serde_json::to_value(&outcome.action_results)?),
                    error_message: error_message.clone(),
                    summary: None,
                },
            )
            .await?;
        self.ingestions.append_trace(id, &trace).await?;
        info!(
            %id,
            status = status.as_str(),
            policy = outcome.policy_name.as_deref().unwrap_or("-"),
            "Ingestion complete"
        );
        self.emit(
            Some(id),
            owner_id,
            "ingestion.status",
            "outcome",
            json!({ "status": status.as_str(), "policy": outcome.policy_name }),
        );

        self.spawn_indexing(id, owner_id, working_text);

        Ok(PipelineOutcome {
            ingestion_id: id,
            status,
            matched_policy_name: outcome.policy_name,
            error_message,
        })
    }

    /// Fire-and-forget semantic indexing; failures are logged, never surfaced.
    fn spawn_indexing(&self, id: Uuid, owner_id: Uuid, text: String) {
        let indexer = Arc::clone(&self.indexer);
        tokio::spawn(async move {
            if let Err(e) = indexer.index_document(id, owner_id, &text).await {
                warn!(
                    subsystem = "pipeline",
                    component = "orchestrator",
                    ingestion_id = %id,
                    error = %e,
                    "Semantic indexing failed"
                );
            }
        });
    }

    fn emit(
        &self,
        ingestion_id: Option<Uuid>,
        owner_id: Uuid,
        kind: &str,
        stage: &str,
        details: JsonValue,
    ) {
        let events = Arc::clone(&self.events);
        let event = PipelineEvent::new(ingestion_id, Some(owner_id), kind, stage, details);
        tokio::spawn(async move {
            if let Err(e) = events.log_event(event).await {
                debug!(
                    subsystem = "pipeline",
                    component = "orchestrator",
                    error = %e,
                    "Event emission failed"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docflow_core::{
        ActionKind, ActionSpec, ChatOptions, ConditionValue, ExtractField, FieldType,
        MatchCondition, MatchSpec, MatchStrategy, NoOpEventSink, NoOpRemoteStorage, Policy,
    };
    use docflow_inference::MockModelService;
    use docflow_policy::{ActionRegistry, ActionRunner};

    use crate::testing::{
        MemIngestionRepository, MemPolicyRepository, NullChunkRepository, RecordingQueue,
    };

    struct Harness {
        repo: Arc<MemIngestionRepository>,
        queue: Arc<RecordingQueue>,
        models: MockModelService,
        orchestrator: Orchestrator,
    }

    fn harness(models: MockModelService, policies: Vec<Policy>) -> Harness {
        let repo = Arc::new(MemIngestionRepository::new());
        let queue = Arc::new(RecordingQueue::new());
        let model_arc: Arc<dyn LanguageModelService> = Arc::new(models.clone());
        let engine = Arc::new(PolicyEngine::new(
            Arc::clone(&model_arc),
            ActionRunner::new(
                Arc::new(ActionRegistry::with_defaults(Arc::new(NoOpRemoteStorage))),
                Arc::new(NoOpEventSink),
            ),
            ChatOptions::new("ollama", "test-model"),
        ));
        let indexer = Arc::new(ChunkIndexer::new(
            Arc::new(NullChunkRepository),
            Arc::clone(&model_arc),
        ));
        let orchestrator = Orchestrator::new(
            Arc::clone(&repo) as Arc<dyn IngestionRepository>,
            PolicyCache::new(Arc::new(MemPolicyRepository::new(policies))),
            engine,
            model_arc,
            indexer,
            Arc::clone(&queue) as Arc<dyn WorkQueue>,
            Arc::new(NoOpEventSink),
        );
        Harness {
            repo,
            queue,
            models,
            orchestrator,
        }
    }

    fn keyword_policy(
        owner_id: Uuid,
        name: &str,
        needle: &str,
        extract_spec: Vec<ExtractField>,
        action_spec: Vec<ActionSpec>,
    ) -> Policy {
        Policy {
            id: Uuid::new_v4(),
            owner_id,
            name: name.to_string(),
            priority: 1,
            enabled: true,
            match_spec: MatchSpec {
                strategy: MatchStrategy::Any,
                conditions: vec![MatchCondition::Keyword {
                    value: ConditionValue::One(needle.to_string()),
                    case_sensitive: false,
                }],
            },
            extract_spec,
            action_spec,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn upload(owner_id: Uuid, filename: &str, data: &[u8]) -> IncomingDocument {
        IncomingDocument {
            owner_id,
            source: SourceKind::Upload,
            filename: filename.to_string(),
            mime_type: "text/plain".to_string(),
            data: data.to_vec(),
            file_path: None,
        }
    }

    #[tokio::test]
    async fn test_ingest_matched_end_to_end() {
        let owner = Uuid::new_v4();
        let models = MockModelService::new()
            .with_reply_containing(
                "uncertain_fields",
                r#"{"entities": {"document_type": "invoice", "issuer": "Acme"}, "uncertain_fields": []}"#,
            )
            .with_reply_containing("YYYY-MM-DD", r#"{"invoice_number": "R-1001"}"#);
        let policy = keyword_policy(
            owner,
            "invoices",
            "invoice",
            vec![ExtractField {
                key: "invoice_number".to_string(),
                field_type: FieldType::String,
                description: String::new(),
                required: true,
                transformers: vec![],
            }],
            vec![ActionSpec {
                action_type: ActionKind::Notify,
                config: serde_json::json!({"message": "filed {invoice_number}"}),
            }],
        );
        let h = harness(models, vec![policy]);

        let outcome = h
            .orchestrator
            .ingest(upload(owner, "invoice.txt", b"ACME invoice total 100"))
            .await
            .unwrap();

        assert_eq!(outcome.status, IngestionStatus::Matched);
        assert_eq!(outcome.matched_policy_name.as_deref(), Some("invoices"));
        assert!(outcome.error_message.is_none());

        let row = h.repo.get(outcome.ingestion_id).await.unwrap();
        assert_eq!(row.status, IngestionStatus::Matched);
        assert_eq!(row.extracted_fields["issuer"], "Acme");
        assert_eq!(row.extracted_fields["invoice_number"], "R-1001");
        assert_eq!(row.actions_executed.as_array().unwrap().len(), 1);
        // The stored text is the raw document, not the matching copy.
        assert!(!row.document_text.as_deref().unwrap().contains("[Extracted fields]"));
        let stages: Vec<&str> = row.trace.iter().map(|s| s.stage.as_str()).collect();
        for stage in ["intake", "triage", "extraction", "policy_match", "actions"] {
            assert!(stages.contains(&stage), "missing stage {stage}: {stages:?}");
        }
    }

    #[tokio::test]
    async fn test_ingest_duplicate_short_circuits() {
        let owner = Uuid::new_v4();
        let h = harness(MockModelService::new(), vec![]);
        let data = b"same bytes every time";

        let first = h
            .orchestrator
            .ingest(upload(owner, "a.txt", data))
            .await
            .unwrap();
        let second = h
            .orchestrator
            .ingest(upload(owner, "b.txt", data))
            .await
            .unwrap();

        assert_eq!(second.status, IngestionStatus::Duplicate);
        let row = h.repo.get(second.ingestion_id).await.unwrap();
        assert!(row.trace[0]
            .detail
            .contains(&first.ingestion_id.to_string()));
        assert_eq!(h.repo.len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_other_owner_is_not_a_duplicate() {
        let h = harness(MockModelService::new(), vec![]);
        let data = b"shared content";

        let first = h
            .orchestrator
            .ingest(upload(Uuid::new_v4(), "a.txt", data))
            .await
            .unwrap();
        let second = h
            .orchestrator
            .ingest(upload(Uuid::new_v4(), "b.txt", data))
            .await
            .unwrap();

        assert_ne!(first.status, IngestionStatus::Duplicate);
        assert_ne!(second.status, IngestionStatus::Duplicate);
    }

    #[tokio::test]
    async fn test_ingest_heavy_path_enqueues_ocr() {
        let owner = Uuid::new_v4();
        let h = harness(MockModelService::new(), vec![]);
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        let mut doc = upload(owner, "scan.png", &png);
        doc.file_path = Some(PathBuf::from("/data/inbox/scan.png"));

        let outcome = h.orchestrator.ingest(doc).await.unwrap();

        assert_eq!(outcome.status, IngestionStatus::Pending);
        let jobs = h.queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].ingestion_id, outcome.ingestion_id);
        assert_eq!(jobs[0].mime_type, "image/png");
        assert_eq!(jobs[0].path, "/data/inbox/scan.png");
        // No model calls on the heavy path.
        assert_eq!(h.models.chat_call_count(), 0);
        let row = h.repo.get(outcome.ingestion_id).await.unwrap();
        assert_eq!(row.status, IngestionStatus::Pending);
    }

    #[tokio::test]
    async fn test_ingest_no_match_ends_no_match() {
        let owner = Uuid::new_v4();
        // Default mock reply is junk; baseline extraction degrades to empty.
        let h = harness(MockModelService::new(), vec![]);

        let outcome = h
            .orchestrator
            .ingest(upload(owner, "notes.txt", b"unremarkable text"))
            .await
            .unwrap();

        assert_eq!(outcome.status, IngestionStatus::NoMatch);
        let row = h.repo.get(outcome.ingestion_id).await.unwrap();
        assert_eq!(row.status, IngestionStatus::NoMatch);
        let actions = row.actions_executed.as_array().unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0]["detail"], "Moved to /_Needs_Review");
        assert!(row
            .trace
            .iter()
            .any(|s| s.detail.contains("No policy matched")));
    }

    #[tokio::test]
    async fn test_ingest_missing_required_ends_error() {
        let owner = Uuid::new_v4();
        let models = MockModelService::new()
            .with_reply_containing("YYYY-MM-DD", r#"{"invoice_number": null}"#);
        let policy = keyword_policy(
            owner,
            "invoices",
            "invoice",
            vec![ExtractField {
                key: "invoice_number".to_string(),
                field_type: FieldType::String,
                description: String::new(),
                required: true,
                transformers: vec![],
            }],
            vec![ActionSpec {
                action_type: ActionKind::Notify,
                config: serde_json::json!({"message": "never runs"}),
            }],
        );
        let h = harness(models, vec![policy]);

        let outcome = h
            .orchestrator
            .ingest(upload(owner, "invoice.txt", b"an invoice"))
            .await
            .unwrap();

        assert_eq!(outcome.status, IngestionStatus::Error);
        assert_eq!(
            outcome.error_message.as_deref(),
            Some("Missing required fields: invoice_number")
        );
        let row = h.repo.get(outcome.ingestion_id).await.unwrap();
        assert_eq!(row.status, IngestionStatus::Error);
        assert!(row.actions_executed.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_repeats_processing_and_keeps_tags() {
        let owner = Uuid::new_v4();
        let h = harness(MockModelService::new(), vec![]);

        let first = h
            .orchestrator
            .ingest(upload(owner, "notes.txt", b"plain notes"))
            .await
            .unwrap();
        h.repo
            .add_tags(first.ingestion_id, &["keep-me".to_string()])
            .await
            .unwrap();

        let rerun = h.orchestrator.rerun(first.ingestion_id).await.unwrap();

        assert_eq!(rerun.ingestion_id, first.ingestion_id);
        assert_eq!(rerun.status, IngestionStatus::NoMatch);
        let row = h.repo.get(first.ingestion_id).await.unwrap();
        assert_eq!(row.tags, vec!["keep-me".to_string()]);
        assert!(row
            .trace
            .iter()
            .any(|s| s.detail.contains("Re-running extraction")));
    }

    #[tokio::test]
    async fn test_rerun_without_stored_text_is_invalid() {
        let h = harness(MockModelService::new(), vec![]);
        let owner = Uuid::new_v4();
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

        // Heavy-path row: no stored text until the OCR worker writes back.
        let outcome = h
            .orchestrator
            .ingest(upload(owner, "scan.png", &png))
            .await
            .unwrap();
        let err = h.orchestrator.rerun(outcome.ingestion_id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{err}");
    }

    #[test]
    fn test_content_hash_is_stable_hex() {
        assert_eq!(
            content_hash(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_ne!(content_hash(b"hello"), content_hash(b"hello "));
    }
}

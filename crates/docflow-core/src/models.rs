//! Core data models for the docflow pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// ─── Ingestion ──────────────────────────────────────────────────────────────

/// Lifecycle status of an ingestion.
///
/// Created as `processing` (or `pending` for heavy-path documents awaiting
/// external OCR); transitions once per run to a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Pending,
    Processing,
    Matched,
    NoMatch,
    Error,
    Duplicate,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Matched => "matched",
            Self::NoMatch => "no_match",
            Self::Error => "error",
            Self::Duplicate => "duplicate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "matched" => Some(Self::Matched),
            "no_match" => Some(Self::NoMatch),
            "error" => Some(Self::Error),
            "duplicate" => Some(Self::Duplicate),
            _ => None,
        }
    }

    /// Terminal statuses never transition again within a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Matched | Self::NoMatch | Self::Error | Self::Duplicate
        )
    }
}

impl std::fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a document entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Upload,
    Dropzone,
    Email,
    Url,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Dropzone => "dropzone",
            Self::Email => "email",
            Self::Url => "url",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(Self::Upload),
            "dropzone" => Some(Self::Dropzone),
            "email" => Some(Self::Email),
            "url" => Some(Self::Url),
            _ => None,
        }
    }
}

/// One timestamped step in an ingestion's processing trace.
///
/// Traces are append-only across runs; a re-run adds steps rather than
/// replacing the history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub at: DateTime<Utc>,
    pub stage: String,
    pub detail: String,
}

impl TraceStep {
    pub fn new(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            stage: stage.into(),
            detail: detail.into(),
        }
    }
}

/// One document moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingestion {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub source: SourceKind,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    /// SHA-256 of the raw document bytes, hex encoded.
    pub content_hash: String,
    pub status: IngestionStatus,
    pub matched_policy_id: Option<Uuid>,
    pub matched_policy_name: Option<String>,
    /// Merged extraction output (baseline underneath policy fields).
    pub extracted_fields: JsonValue,
    /// Ordered action execution records from the winning policy.
    pub actions_executed: JsonValue,
    pub error_message: Option<String>,
    pub trace: Vec<TraceStep>,
    /// Free-form tags; human-added tags survive re-runs.
    pub tags: Vec<String>,
    pub summary: Option<String>,
    /// Extracted document text, kept for re-runs and semantic indexing.
    pub document_text: Option<String>,
    /// Filesystem location of the stored original, when available.
    pub file_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create an ingestion row.
#[derive(Debug, Clone)]
pub struct CreateIngestionRequest {
    pub owner_id: Uuid,
    pub source: SourceKind,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub status: IngestionStatus,
    pub file_path: Option<String>,
    pub trace: Vec<TraceStep>,
}

/// Terminal outcome applied to an ingestion at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct IngestionOutcome {
    pub status: Option<IngestionStatus>,
    pub matched_policy_id: Option<Uuid>,
    pub matched_policy_name: Option<String>,
    pub extracted_fields: Option<JsonValue>,
    pub actions_executed: Option<JsonValue>,
    pub error_message: Option<String>,
    pub summary: Option<String>,
}

// ─── Policy ─────────────────────────────────────────────────────────────────

/// How a policy's conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchStrategy {
    /// Every condition must pass; short-circuits on first failure.
    All,
    /// Any condition passing is enough; short-circuits on first pass.
    Any,
}

/// A condition's match value: a single candidate or a candidate list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    One(String),
    Many(Vec<String>),
}

impl ConditionValue {
    /// All candidate values, in declaration order.
    pub fn candidates(&self) -> Vec<&str> {
        match self {
            Self::One(v) => vec![v.as_str()],
            Self::Many(vs) => vs.iter().map(|v| v.as_str()).collect(),
        }
    }
}

fn default_confidence() -> f32 {
    crate::defaults::SEMANTIC_CONFIDENCE_THRESHOLD
}

/// One match condition inside a policy's match spec.
///
/// `llm_verify` and `semantic` share semantics: a yes/no question answered by
/// a language model, gated on confidence. Both variants exist because stored
/// policies use either tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchCondition {
    Keyword {
        value: ConditionValue,
        #[serde(default)]
        case_sensitive: bool,
    },
    Filename {
        value: ConditionValue,
        #[serde(default)]
        case_sensitive: bool,
    },
    FileType {
        value: String,
    },
    MimeType {
        value: String,
    },
    LlmVerify {
        question: String,
        #[serde(default = "default_confidence")]
        threshold: f32,
    },
    Semantic {
        question: String,
        #[serde(default = "default_confidence")]
        threshold: f32,
    },
}

impl MatchCondition {
    /// Short label used in trace steps and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Keyword { .. } => "keyword",
            Self::Filename { .. } => "filename",
            Self::FileType { .. } => "file_type",
            Self::MimeType { .. } => "mime_type",
            Self::LlmVerify { .. } => "llm_verify",
            Self::Semantic { .. } => "semantic",
        }
    }
}

/// A policy's match spec: strategy plus ordered conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSpec {
    pub strategy: MatchStrategy,
    pub conditions: Vec<MatchCondition>,
}

/// Data type a field extraction should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    String,
    Number,
    Date,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Date => "date",
            Self::Boolean => "boolean",
        }
    }
}

/// Transformer deriving a synthetic variable from a field's raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformOp {
    GetYear,
    GetMonth,
    GetMonthName,
}

impl TransformOp {
    /// Suffix appended to the field key for the default derived-variable name.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::GetYear => "year",
            Self::GetMonth => "month",
            Self::GetMonthName => "month_name",
        }
    }
}

/// A field-level transformer attached to an extract field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldTransformer {
    pub op: TransformOp,
    /// Derived variable name; defaults to `{field_key}_{suffix}`.
    #[serde(default)]
    pub output: Option<String>,
}

/// One typed field in a policy's extract spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractField {
    pub key: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub transformers: Vec<FieldTransformer>,
}

/// Action types the action registry knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Rename,
    Move,
    Copy,
    CopyToGdrive,
    AppendToGoogleSheet,
    LogCsv,
    Notify,
    Webhook,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rename => "rename",
            Self::Move => "move",
            Self::Copy => "copy",
            Self::CopyToGdrive => "copy_to_gdrive",
            Self::AppendToGoogleSheet => "append_to_google_sheet",
            Self::LogCsv => "log_csv",
            Self::Notify => "notify",
            Self::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One action inside a policy's action spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub action_type: ActionKind,
    /// Free-form config interpreted by the matching handler.
    #[serde(default)]
    pub config: JsonValue,
}

/// A user-authored processing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    /// Lower priority evaluates first.
    pub priority: i32,
    pub enabled: bool,
    pub match_spec: MatchSpec,
    pub extract_spec: Vec<ExtractField>,
    pub action_spec: Vec<ActionSpec>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a policy.
#[derive(Debug, Clone)]
pub struct CreatePolicyRequest {
    pub owner_id: Uuid,
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub match_spec: MatchSpec,
    pub extract_spec: Vec<ExtractField>,
    pub action_spec: Vec<ActionSpec>,
}

/// Partial policy update; `None` fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct PolicyUpdate {
    pub name: Option<String>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
    pub match_spec: Option<MatchSpec>,
    pub extract_spec: Option<Vec<ExtractField>>,
    pub action_spec: Option<Vec<ActionSpec>>,
}

// ─── Baseline extraction ───────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

/// One field in the baseline extraction schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineField {
    pub key: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl BaselineField {
    pub fn new(
        key: impl Into<String>,
        field_type: FieldType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            field_type,
            description: description.into(),
            enabled: true,
        }
    }
}

/// Output of a baseline extraction pass. Never an error: failures collapse
/// to empty maps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaselineExtraction {
    pub entities: serde_json::Map<String, JsonValue>,
    pub uncertain_fields: Vec<String>,
}

// ─── Chunks & retrieval ─────────────────────────────────────────────────────

/// The `(provider, model)` pair an embedding vector was generated under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingScope {
    pub provider: String,
    pub model: String,
}

impl EmbeddingScope {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl std::fmt::Display for EmbeddingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// A new chunk row ready for insertion.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub ingestion_id: Uuid,
    pub owner_id: Uuid,
    pub chunk_index: i32,
    pub content: String,
    /// SHA-256 of `content`, hex encoded.
    pub content_hash: String,
    pub scope: EmbeddingScope,
    pub vector: Vec<f32>,
}

/// One similarity hit from the chunk store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHit {
    pub chunk_id: Uuid,
    pub ingestion_id: Uuid,
    pub content: String,
    pub similarity: f32,
    pub provider: String,
    pub model: String,
}

// ─── Vision capability learning ─────────────────────────────────────────────

/// Persisted belief about a model's image-input support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisionState {
    Supported,
    Unsupported,
    /// Internal state while confirmation is pending; reads as `unknown`.
    PendingUnsupported,
}

impl VisionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supported => "supported",
            Self::Unsupported => "unsupported",
            Self::PendingUnsupported => "pending_unsupported",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "supported" => Some(Self::Supported),
            "unsupported" => Some(Self::Unsupported),
            "pending_unsupported" => Some(Self::PendingUnsupported),
            _ => None,
        }
    }
}

/// Externally observable capability reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisionSupport {
    Supported,
    Unsupported,
    Unknown,
}

/// Canonical capability-map key: `provider:model`, lower-cased and trimmed.
pub fn capability_key(provider: &str, model: &str) -> String {
    format!(
        "{}:{}",
        provider.trim().to_lowercase(),
        model.trim().to_lowercase()
    )
}

/// One capability record, keyed by [`capability_key`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionCapabilityRecord {
    pub key: String,
    pub state: VisionState,
    pub learned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Rolling failure count, meaningful only while `pending_unsupported`.
    #[serde(default)]
    pub failure_count: i32,
    #[serde(default)]
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl VisionCapabilityRecord {
    /// Expired records are treated as absent.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Collapse the stored state into the externally observable reading.
    pub fn support(&self, now: DateTime<Utc>) -> VisionSupport {
        if self.is_expired(now) {
            return VisionSupport::Unknown;
        }
        match self.state {
            VisionState::Supported => VisionSupport::Supported,
            VisionState::Unsupported => VisionSupport::Unsupported,
            VisionState::PendingUnsupported => VisionSupport::Unknown,
        }
    }
}

/// Result of a vision-support resolution for a `(provider, model)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionResolution {
    pub provider: String,
    pub model: String,
    pub support: VisionSupport,
    /// False only when support is `unsupported`.
    pub should_attempt: bool,
}

// ─── Policy-match feedback ──────────────────────────────────────────────────

/// Normalized features extracted from one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentFeatures {
    /// Deduplicated token list, capped at `defaults::LEARNER_MAX_TOKENS`.
    pub tokens: Vec<String>,
    pub extension: Option<String>,
    pub mime_type: Option<String>,
    pub document_type: Option<String>,
    pub issuer: Option<String>,
}

/// One confirmed (ingestion, policy) pair with its feature snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyFeedback {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub ingestion_id: Uuid,
    pub policy_id: Uuid,
    pub features: DocumentFeatures,
    pub created_at: DateTime<Utc>,
}

/// New feedback row; upserted by `(owner, ingestion, policy)`.
#[derive(Debug, Clone)]
pub struct NewPolicyFeedback {
    pub owner_id: Uuid,
    pub ingestion_id: Uuid,
    pub policy_id: Uuid,
    pub features: DocumentFeatures,
}

/// A learner recommendation that cleared the adaptive bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySuggestion {
    pub policy_id: Uuid,
    pub score: f64,
    pub samples: usize,
}

// ─── Collaborator DTOs ──────────────────────────────────────────────────────

/// One chat message sent to the language model service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call chat options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOptions {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl ChatOptions {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: None,
        }
    }
}

/// One provider with its available chat models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderModels {
    pub provider: String,
    pub models: Vec<String>,
}

/// Heavy-path job descriptor handed to the work-queue collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrJobDescriptor {
    pub owner_id: Uuid,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub path: String,
    pub ingestion_id: Uuid,
}

/// Best-effort structured event for the external event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub ingestion_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    /// Dot-namespaced kind, e.g. `ingestion.status`, `action.executed`.
    pub kind: String,
    pub stage: String,
    pub details: JsonValue,
}

impl PipelineEvent {
    pub fn new(
        ingestion_id: Option<Uuid>,
        owner_id: Option<Uuid>,
        kind: impl Into<String>,
        stage: impl Into<String>,
        details: JsonValue,
    ) -> Self {
        Self {
            ingestion_id,
            owner_id,
            kind: kind.into(),
            stage: stage.into(),
            details,
        }
    }
}

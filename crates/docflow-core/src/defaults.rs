//! Centralized default constants for the docflow pipeline.
//!
//! **This module is the single source of truth** for all shared default values.
//! All crates should reference these constants instead of defining their own
//! magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

use crate::models::{BaselineField, FieldType};

// =============================================================================
// TRIAGE
// =============================================================================

/// Extensions that always take the fast path (no OCR consideration).
pub const FAST_PATH_EXTENSIONS: &[&str] = &["txt", "md", "csv", "json"];

/// Minimum whitespace-collapsed character count for a PDF to be considered
/// text-extractable.
pub const TRIAGE_MIN_CONTENT_CHARS: usize = 100;

/// Minimum number of letter runs (length >= 2) for a PDF to pass the
/// word-density signal.
pub const TRIAGE_MIN_WORD_RUNS: usize = 20;

/// Maximum tolerated fraction of control/replacement characters.
pub const TRIAGE_MAX_GARBAGE_RATIO: f64 = 0.02;

/// Page coverage is only checked when a document has more pages than this.
pub const TRIAGE_COVERAGE_PAGE_FLOOR: usize = 2;

/// Minimum fraction of pages that must carry real text.
pub const TRIAGE_PAGE_COVERAGE_RATIO: f64 = 0.40;

/// A page counts as covered when it has more than this many
/// non-whitespace characters.
pub const TRIAGE_PAGE_MIN_CHARS: usize = 30;

/// Per-command timeout for the external PDF text extraction tool (seconds).
pub const PDF_EXTRACT_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// CHUNKING
// =============================================================================

/// Maximum characters per chunk for text splitting.
pub const CHUNK_MAX_CHARS: usize = 1000;

// =============================================================================
// EMBEDDING / INDEXING
// =============================================================================

/// Pacing delay between consecutive embedding calls (milliseconds).
pub const EMBED_PACING_MS: u64 = 100;

/// Default process-wide cap on concurrent chunk-and-embed jobs.
pub const EMBED_JOB_CONCURRENCY: usize = 2;

/// Environment variable overriding [`EMBED_JOB_CONCURRENCY`].
pub const ENV_EMBED_JOB_CONCURRENCY: &str = "DOCFLOW_EMBED_JOB_CONCURRENCY";

/// Default embedding provider.
pub const EMBED_PROVIDER: &str = "ollama";

/// Default embedding model name.
pub const EMBED_MODEL: &str = "nomic-embed-text";

/// Environment variable for the default embedding provider.
pub const ENV_EMBED_PROVIDER: &str = "DOCFLOW_EMBED_PROVIDER";

/// Environment variable for the default embedding model.
pub const ENV_EMBED_MODEL: &str = "DOCFLOW_EMBED_MODEL";

// =============================================================================
// RETRIEVAL
// =============================================================================

/// Default similarity threshold for callers that do not pass one.
pub const SEARCH_THRESHOLD: f32 = 0.35;

/// Relaxed-retry threshold cap: retry runs at `max(floor, min(threshold, cap))`.
pub const SEARCH_RELAXED_CAP: f32 = 0.4;

/// Relaxed-retry threshold floor.
pub const SEARCH_RELAXED_FLOOR: f32 = 0.1;

/// Default result count for retrieval queries.
pub const SEARCH_LIMIT: i64 = 8;

// =============================================================================
// INFERENCE / GATEWAY
// =============================================================================

/// Default model gateway base URL.
pub const GATEWAY_URL: &str = "http://127.0.0.1:8811";

/// Environment variable for the model gateway base URL.
pub const ENV_GATEWAY_URL: &str = "DOCFLOW_GATEWAY_URL";

/// Default chat provider.
pub const CHAT_PROVIDER: &str = "ollama";

/// Default chat model name.
pub const CHAT_MODEL: &str = "gpt-oss:20b";

/// Environment variable for the default chat provider.
pub const ENV_CHAT_PROVIDER: &str = "DOCFLOW_CHAT_PROVIDER";

/// Environment variable for the default chat model.
pub const ENV_CHAT_MODEL: &str = "DOCFLOW_CHAT_MODEL";

/// Timeout applied to provider-listing calls (seconds). Document-processing
/// calls deliberately carry no timeout at this boundary.
pub const PROVIDER_LIST_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// EXTRACTION WINDOWS
// =============================================================================

/// Characters of document text sent with a semantic/LLM-verify condition.
pub const CONDITION_TEXT_CHARS: usize = 2000;

/// Characters of document text sent with a policy field extraction prompt.
pub const EXTRACT_TEXT_CHARS: usize = 3000;

/// Default confidence threshold for semantic/LLM-verify conditions.
pub const SEMANTIC_CONFIDENCE_THRESHOLD: f32 = 0.8;

// =============================================================================
// VISION CAPABILITY LEARNING
// =============================================================================

/// Sliding confirmation window for repeated capability failures (hours).
pub const VISION_CONFIRMATION_WINDOW_HOURS: i64 = 24;

/// Capability failures required inside the window before `unsupported`
/// is persisted.
pub const VISION_CONFIRMATION_FAILURES: i32 = 2;

/// TTL for `pending_unsupported` records (hours).
pub const VISION_PENDING_TTL_HOURS: i64 = 24;

/// TTL for `unsupported` records (days).
pub const VISION_UNSUPPORTED_TTL_DAYS: i64 = 30;

/// TTL for `supported` records (days).
pub const VISION_SUPPORTED_TTL_DAYS: i64 = 180;

/// Minimum capability score for a failure to count as a capability error.
pub const VISION_CAPABILITY_SCORE: i32 = 3;

// =============================================================================
// POLICY-MATCH LEARNING
// =============================================================================

/// Maximum deduplicated feature tokens per document.
pub const LEARNER_MAX_TOKENS: usize = 120;

/// Characters of raw text folded into the feature token set.
pub const LEARNER_TEXT_CHARS: usize = 1200;

/// Depth limit when flattening scalar values out of the entity tree.
pub const LEARNER_FLATTEN_DEPTH: usize = 2;

/// Weight of token-set Jaccard similarity in the pairwise score.
pub const LEARNER_JACCARD_WEIGHT: f64 = 0.72;

/// Acceptance bar when a policy is backed by two or more samples.
pub const LEARNER_MULTI_SAMPLE_BAR: f64 = 0.72;

/// Acceptance bar when only a single sample backs a policy.
pub const LEARNER_SINGLE_SAMPLE_BAR: f64 = 0.82;

/// Historical scores averaged per candidate policy.
pub const LEARNER_TOP_SAMPLES: usize = 3;

/// Cap on the sample-count boost.
pub const LEARNER_COUNT_BOOST_CAP: f64 = 0.08;

/// Per-extra-sample boost step.
pub const LEARNER_COUNT_BOOST_STEP: f64 = 0.02;

/// Bonus/penalty for file extension agreement.
pub const LEARNER_EXT_BONUS: f64 = 0.07;
pub const LEARNER_EXT_PENALTY: f64 = 0.03;

/// Bonus/penalty for MIME type agreement.
pub const LEARNER_MIME_BONUS: f64 = 0.06;
pub const LEARNER_MIME_PENALTY: f64 = 0.02;

/// Bonus/penalty for document-type soft match.
pub const LEARNER_DOCTYPE_BONUS: f64 = 0.09;
pub const LEARNER_DOCTYPE_PENALTY: f64 = 0.04;

/// Bonus/penalty for issuer soft match.
pub const LEARNER_ISSUER_BONUS: f64 = 0.06;
pub const LEARNER_ISSUER_PENALTY: f64 = 0.02;

// =============================================================================
// ACTIONS
// =============================================================================

/// Webhook HTTP request timeout in seconds.
pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for ingestion listings.
pub const LIST_LIMIT: i64 = 50;

/// Internal "fetch everything" limit for aggregation queries.
pub const INTERNAL_FETCH_LIMIT: i64 = 10_000;

// =============================================================================
// BASELINE EXTRACTION
// =============================================================================

/// Default baseline field schema applied to every fast-path document.
///
/// Callers may substitute a user-configured schema; these keys are the ones
/// the policy-match learner's alias lists expect to find.
pub fn baseline_fields() -> Vec<BaselineField> {
    vec![
        BaselineField::new(
            "document_type",
            FieldType::String,
            "Kind of document, e.g. invoice, receipt, letter, contract",
        ),
        BaselineField::new(
            "issuer",
            FieldType::String,
            "Organization or person that produced the document",
        ),
        BaselineField::new(
            "recipient",
            FieldType::String,
            "Organization or person the document is addressed to",
        ),
        BaselineField::new(
            "document_date",
            FieldType::Date,
            "Primary date on the document (issue date, not due date)",
        ),
        BaselineField::new(
            "total_amount",
            FieldType::Number,
            "Total monetary amount if the document is financial",
        ),
        BaselineField::new("currency", FieldType::String, "ISO currency code if present"),
        BaselineField::new(
            "document_number",
            FieldType::String,
            "Invoice/receipt/reference number if present",
        ),
        BaselineField::new(
            "summary",
            FieldType::String,
            "One-sentence prose summary of the document",
        ),
    ]
}

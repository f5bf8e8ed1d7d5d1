//! Structured logging schema and field name constants for docflow.
//!
//! All crates use these constants for consistent structured logging fields.
//! This ensures log aggregation tools (Loki, Elasticsearch) can query by
//! standardized field names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (ingestion created, status transitions) |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (chunks, trace steps) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "pipeline", "policy", "retrieval", "inference", "db"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "triage", "engine", "actions", "indexer", "gateway", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "process_document", "evaluate", "execute", "embed", "search"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Ingestion UUID being operated on.
pub const INGESTION_ID: &str = "ingestion_id";

/// Policy UUID being evaluated or executed.
pub const POLICY_ID: &str = "policy_id";

/// Owning user UUID.
pub const OWNER_ID: &str = "owner_id";

/// Action type being executed ("rename", "move", "webhook", ...).
pub const ACTION_TYPE: &str = "action_type";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a search or query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of chunks processed (embedding, chunking).
pub const CHUNK_COUNT: &str = "chunk_count";

/// Byte length of a prompt or response.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

// ─── Retrieval fields ──────────────────────────────────────────────────────

/// Embedding provider of the active chunk scope.
pub const EMBED_PROVIDER: &str = "embed_provider";

/// Embedding model of the active chunk scope.
pub const EMBED_MODEL: &str = "embed_model";

/// Similarity threshold applied to a search pass.
pub const THRESHOLD: &str = "threshold";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Chat/completion model name used for inference.
pub const MODEL: &str = "model";

/// Provider name used for inference.
pub const PROVIDER: &str = "provider";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";

//! Vision failure classification and per-model capability learning.
//!
//! Image-capable extraction cannot know up front whether a given
//! `(provider, model)` pair accepts image input; providers disagree on how
//! they refuse. This module classifies a failed vision call into transient,
//! document-specific, or capability failures, and maintains a persisted
//! belief per model: `supported`, `unsupported`, or `pending_unsupported`
//! awaiting confirmation. All beliefs expire by TTL back to `unknown`.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use docflow_core::{
    capability_key, defaults, CapabilityRepository, Result, VisionCapabilityRecord,
    VisionResolution, VisionState, VisionSupport,
};

// ─── Failure classification ─────────────────────────────────────────────────

/// HTTP statuses that indicate infrastructure or credential trouble, never
/// a missing model capability.
const TRANSIENT_OR_AUTH_STATUSES: &[u16] = &[401, 403, 408, 429, 500, 502, 503, 504];

/// Message fragments with the same meaning as the statuses above.
const TRANSIENT_HINTS: &[&str] = &[
    "timeout",
    "timed out",
    "rate limit",
    "too many requests",
    "unauthorized",
    "forbidden",
    "invalid api key",
    "authentication",
    "insufficient quota",
    "overloaded",
    "temporarily unavailable",
    "connection refused",
    "connection reset",
];

/// Error codes that blame this particular payload, not the model.
const DOCUMENT_CODES: &[&str] = &[
    "invalid_base64",
    "invalid_image",
    "image_parse_error",
    "image_too_large",
];

/// Message fragments that blame this particular payload.
const DOCUMENT_HINTS: &[&str] = &[
    "invalid base64",
    "could not decode image",
    "failed to decode image",
    "image exceeds",
    "image too large",
    "corrupt image",
    "unsupported image format",
];

/// Structured error codes that explicitly name a capability gap.
const CAPABILITY_CODES: &[&str] = &[
    "model_not_multimodal",
    "vision_not_supported",
    "unsupported_content_type",
    "invalid_content_type",
    "multimodal_unavailable",
];

/// High-precision refusal phrasings seen across providers.
const CAPABILITY_PHRASES: &[&str] = &[
    "does not support images",
    "does not support image input",
    "cannot process images",
    "images are not supported",
    "image input is not supported",
    "no vision capability",
];

/// Provider-specific refusal phrasings (OpenAI, Anthropic, Google, gateway).
const PROVIDER_PHRASES: &[&str] = &[
    "image_url is only supported by certain models",
    "invalid content type. image_url",
    "unexpected content type \"image\"",
    "only text is supported by this model",
    "multimodal input is not enabled",
    "model capability image not available",
];

/// Ambiguous fragments that only count alongside a 400/415/422 status.
const WEAK_HINTS: &[&str] = &["vision", "multimodal", "image_url", "image input", "visual input"];

/// What a failed vision call tells us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Infrastructure or credential failure; says nothing about the model.
    TransientOrAuth,
    /// This document's payload is at fault; the model may still be capable.
    DocumentSpecific,
    /// The model refused image input; counts toward `unsupported`.
    Capability,
    /// Not enough signal to classify.
    Inconclusive,
}

impl FailureClass {
    /// Stable reason code persisted alongside capability records.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::TransientOrAuth => "transient_or_auth",
            Self::DocumentSpecific => "document_specific_failure",
            Self::Capability => "capability_error",
            Self::Inconclusive => "inconclusive",
        }
    }
}

/// Outcome of classifying one failed vision call.
#[derive(Debug, Clone)]
pub struct VisionFailureAssessment {
    pub class: FailureClass,
    /// Capability score; meaningful only for the scoring branch.
    pub score: i32,
    /// Signals that drove the classification, e.g. `status:429`.
    pub evidence: Vec<String>,
}

impl VisionFailureAssessment {
    pub fn is_capability_error(&self) -> bool {
        self.class == FailureClass::Capability
    }

    pub fn reason(&self) -> &'static str {
        self.class.reason()
    }
}

/// Normalized signal pulled out of a provider error payload.
#[derive(Debug, Default)]
struct FailureSignal {
    /// All message-like strings, lower-cased and space-joined.
    text: String,
    statuses: Vec<u16>,
    codes: Vec<String>,
}

/// Keys whose nested objects are worth descending into.
const NEST_KEYS: &[&str] = &["error", "response", "data", "cause"];

/// Keys carrying human-readable failure text.
const MESSAGE_KEYS: &[&str] = &["message", "detail", "description", "msg", "reason", "error"];

/// Keys carrying an HTTP status or structured code.
const CODE_KEYS: &[&str] = &["status", "status_code", "statusCode", "http_status", "code", "type"];

fn extract_signal(failure: &JsonValue) -> FailureSignal {
    let mut signal = FailureSignal::default();
    let mut parts: Vec<String> = Vec::new();
    collect(failure, 0, &mut signal, &mut parts);
    signal.text = parts.join(" ");
    signal
}

fn collect(value: &JsonValue, depth: usize, signal: &mut FailureSignal, parts: &mut Vec<String>) {
    match value {
        JsonValue::String(s) => parts.push(s.to_lowercase()),
        JsonValue::Object(map) => {
            for key in MESSAGE_KEYS {
                if let Some(JsonValue::String(s)) = map.get(*key) {
                    parts.push(s.to_lowercase());
                }
            }
            for key in CODE_KEYS {
                match map.get(*key) {
                    Some(JsonValue::Number(n)) => {
                        if let Some(status) = n.as_u64().filter(|v| (100..=599).contains(v)) {
                            signal.statuses.push(status as u16);
                        }
                    }
                    Some(JsonValue::String(s)) => {
                        if let Ok(status) = s.parse::<u16>() {
                            if (100..=599).contains(&status) {
                                signal.statuses.push(status);
                                continue;
                            }
                        }
                        signal.codes.push(s.to_lowercase());
                    }
                    _ => {}
                }
            }
            if depth < 2 {
                for key in NEST_KEYS {
                    if let Some(nested @ JsonValue::Object(_)) = map.get(*key) {
                        collect(nested, depth + 1, signal, parts);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Classify a failed vision call from its error payload.
///
/// Rules apply in strict priority order; the first matching class wins.
/// Capability is only reported when the accumulated score reaches
/// [`defaults::VISION_CAPABILITY_SCORE`].
pub fn classify_vision_failure(failure: &JsonValue) -> VisionFailureAssessment {
    let signal = extract_signal(failure);
    let mut evidence = Vec::new();

    // 1. Transient or auth: never a capability signal.
    if let Some(status) = signal
        .statuses
        .iter()
        .find(|s| TRANSIENT_OR_AUTH_STATUSES.contains(s))
    {
        evidence.push(format!("status:{}", status));
        return VisionFailureAssessment {
            class: FailureClass::TransientOrAuth,
            score: 0,
            evidence,
        };
    }
    if let Some(hint) = TRANSIENT_HINTS.iter().find(|h| signal.text.contains(**h)) {
        evidence.push(format!("hint:{}", hint));
        return VisionFailureAssessment {
            class: FailureClass::TransientOrAuth,
            score: 0,
            evidence,
        };
    }

    // 2. Document-specific: this payload, not this model.
    if signal.statuses.contains(&413) {
        evidence.push("status:413".to_string());
        return VisionFailureAssessment {
            class: FailureClass::DocumentSpecific,
            score: 0,
            evidence,
        };
    }
    if signal.statuses.iter().any(|s| *s == 415 || *s == 422) {
        let code_hit = DOCUMENT_CODES
            .iter()
            .find(|c| signal.codes.iter().any(|sc| sc == *c));
        let text_hit = DOCUMENT_HINTS.iter().find(|h| signal.text.contains(**h));
        if let Some(code) = code_hit {
            evidence.push(format!("code:{}", code));
            return VisionFailureAssessment {
                class: FailureClass::DocumentSpecific,
                score: 0,
                evidence,
            };
        }
        if let Some(hint) = text_hit {
            evidence.push(format!("hint:{}", hint));
            return VisionFailureAssessment {
                class: FailureClass::DocumentSpecific,
                score: 0,
                evidence,
            };
        }
    }

    // 3. Capability scoring. Each category counts at most once.
    let mut score = 0;
    if let Some(code) = CAPABILITY_CODES
        .iter()
        .find(|c| signal.codes.iter().any(|sc| sc == *c))
    {
        score += 3;
        evidence.push(format!("code:{}", code));
    }
    if let Some(phrase) = CAPABILITY_PHRASES.iter().find(|p| signal.text.contains(**p)) {
        score += 3;
        evidence.push(format!("phrase:{}", phrase));
    }
    if let Some(phrase) = PROVIDER_PHRASES.iter().find(|p| signal.text.contains(**p)) {
        score += 2;
        evidence.push(format!("provider_phrase:{}", phrase));
    }
    let soft_status = signal
        .statuses
        .iter()
        .find(|s| matches!(**s, 400 | 415 | 422))
        .copied();
    if soft_status.is_some() {
        if let Some(hint) = WEAK_HINTS.iter().find(|h| signal.text.contains(**h)) {
            score += 1;
            evidence.push(format!("weak_hint:{}", hint));
        }
    }
    if let Some(status) = signal.statuses.iter().find(|s| matches!(**s, 400 | 422)) {
        score += 1;
        evidence.push(format!("status:{}", status));
    }

    let class = if score >= defaults::VISION_CAPABILITY_SCORE {
        FailureClass::Capability
    } else {
        FailureClass::Inconclusive
    };
    VisionFailureAssessment {
        class,
        score,
        evidence,
    }
}

// ─── Capability learner ─────────────────────────────────────────────────────

/// Learns per `(provider, model)` whether image input works, from observed
/// successes and classified failures.
pub struct VisionLearner {
    repo: Arc<dyn CapabilityRepository>,
}

impl VisionLearner {
    pub fn new(repo: Arc<dyn CapabilityRepository>) -> Self {
        Self { repo }
    }

    /// Current belief for a model. `should_attempt` is false only for a
    /// live (unexpired) `unsupported` record.
    #[instrument(skip(self), fields(subsystem = "inference", component = "vision", op = "resolve", provider = %provider, model = %model))]
    pub async fn resolve_vision_support(
        &self,
        provider: &str,
        model: &str,
    ) -> Result<VisionResolution> {
        let key = capability_key(provider, model);
        let now = Utc::now();
        let support = match self.repo.get(&key).await? {
            Some(record) => record.support(now),
            None => VisionSupport::Unknown,
        };
        let should_attempt = support != VisionSupport::Unsupported;
        debug!(support = ?support, should_attempt, "Resolved vision support");
        Ok(VisionResolution {
            provider: provider.to_string(),
            model: model.to_string(),
            support,
            should_attempt,
        })
    }

    /// A successful vision call proves support; persists immediately and
    /// clears any failure bookkeeping.
    #[instrument(skip(self), fields(subsystem = "inference", component = "vision", op = "record_success", provider = %provider, model = %model))]
    pub async fn record_success(&self, provider: &str, model: &str) -> Result<()> {
        let key = capability_key(provider, model);
        let now = Utc::now();
        let record = VisionCapabilityRecord {
            key: key.clone(),
            state: VisionState::Supported,
            learned_at: now,
            expires_at: now + Duration::days(defaults::VISION_SUPPORTED_TTL_DAYS),
            reason: "observed_success".to_string(),
            evidence: vec![],
            failure_count: 0,
            last_failure_at: None,
        };
        self.repo.upsert(&record).await?;
        info!(key = %key, "Vision support confirmed");
        Ok(())
    }

    /// Classify a failed vision call and update the capability belief.
    ///
    /// Only capability failures change state, and a single one is not
    /// enough: the first inside a sliding window persists
    /// `pending_unsupported`; a second within the window confirms
    /// `unsupported`. A failure outside the window resets the count.
    #[instrument(skip(self, failure), fields(subsystem = "inference", component = "vision", op = "record_failure", provider = %provider, model = %model))]
    pub async fn record_failure(
        &self,
        provider: &str,
        model: &str,
        failure: &JsonValue,
    ) -> Result<VisionFailureAssessment> {
        let assessment = classify_vision_failure(failure);
        if !assessment.is_capability_error() {
            debug!(
                reason = assessment.reason(),
                score = assessment.score,
                "Vision failure not capability-related"
            );
            return Ok(assessment);
        }

        let key = capability_key(provider, model);
        let now = Utc::now();
        let window = Duration::hours(defaults::VISION_CONFIRMATION_WINDOW_HOURS);

        let prior = self.repo.get(&key).await?;
        let failure_count = match &prior {
            Some(r) if !r.is_expired(now) => match r.state {
                // Already confirmed; keep counting and refresh the TTL below.
                VisionState::Unsupported => r.failure_count.saturating_add(1),
                VisionState::PendingUnsupported => {
                    let inside_window = r
                        .last_failure_at
                        .map(|t| now - t < window)
                        .unwrap_or(false);
                    if inside_window {
                        r.failure_count + 1
                    } else {
                        1
                    }
                }
                VisionState::Supported => 1,
            },
            _ => 1,
        };

        let (state, ttl, reason) = if failure_count >= defaults::VISION_CONFIRMATION_FAILURES {
            (
                VisionState::Unsupported,
                Duration::days(defaults::VISION_UNSUPPORTED_TTL_DAYS),
                "capability_error_confirmed",
            )
        } else {
            (
                VisionState::PendingUnsupported,
                Duration::hours(defaults::VISION_PENDING_TTL_HOURS),
                "capability_error_pending",
            )
        };

        let record = VisionCapabilityRecord {
            key: key.clone(),
            state,
            learned_at: now,
            expires_at: now + ttl,
            reason: reason.to_string(),
            evidence: assessment.evidence.clone(),
            failure_count,
            last_failure_at: Some(now),
        };
        self.repo.upsert(&record).await?;

        match state {
            VisionState::Unsupported => {
                warn!(key = %key, failure_count, "Vision capability confirmed unsupported")
            }
            _ => info!(key = %key, failure_count, "Vision capability failure pending confirmation"),
        }
        Ok(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemCapabilityRepo {
        records: Mutex<HashMap<String, VisionCapabilityRecord>>,
    }

    #[async_trait]
    impl CapabilityRepository for MemCapabilityRepo {
        async fn get(&self, key: &str) -> Result<Option<VisionCapabilityRecord>> {
            Ok(self.records.lock().unwrap().get(key).cloned())
        }

        async fn upsert(&self, record: &VisionCapabilityRecord) -> Result<()> {
            self.records
                .lock()
                .unwrap()
                .insert(record.key.clone(), record.clone());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.records.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn setup() -> (VisionLearner, Arc<MemCapabilityRepo>) {
        let repo = Arc::new(MemCapabilityRepo::default());
        (VisionLearner::new(repo.clone()), repo)
    }

    fn capability_failure() -> JsonValue {
        json!({"error": {"message": "This model does not support images", "status": 400}})
    }

    // ── classifier ──

    #[test]
    fn test_rate_limit_status_is_transient() {
        let a = classify_vision_failure(&json!({"status": 429, "message": "slow down"}));
        assert_eq!(a.class, FailureClass::TransientOrAuth);
        assert!(a.evidence.iter().any(|e| e == "status:429"));
    }

    #[test]
    fn test_auth_status_is_transient() {
        let a = classify_vision_failure(&json!({"error": {"status": 401, "message": "bad key"}}));
        assert_eq!(a.class, FailureClass::TransientOrAuth);
    }

    #[test]
    fn test_timeout_hint_is_transient() {
        let a = classify_vision_failure(&json!({"message": "Request timed out after 60s"}));
        assert_eq!(a.class, FailureClass::TransientOrAuth);
    }

    #[test]
    fn test_payload_too_large_is_document_specific() {
        let a = classify_vision_failure(&json!({"status": 413}));
        assert_eq!(a.class, FailureClass::DocumentSpecific);
    }

    #[test]
    fn test_invalid_base64_with_422_is_document_specific() {
        let a = classify_vision_failure(&json!({
            "status": 422,
            "message": "invalid base64 in image payload"
        }));
        assert_eq!(a.class, FailureClass::DocumentSpecific);
    }

    #[test]
    fn test_explicit_capability_code_scores_three() {
        let a = classify_vision_failure(&json!({"error": {"code": "model_not_multimodal"}}));
        assert_eq!(a.class, FailureClass::Capability);
        assert_eq!(a.score, 3);
    }

    #[test]
    fn test_high_precision_phrase_scores_three() {
        let a = classify_vision_failure(&json!({"message": "Model llama3 does not support images."}));
        assert_eq!(a.class, FailureClass::Capability);
        assert!(a.score >= 3);
    }

    #[test]
    fn test_weak_hint_needs_soft_status() {
        // weak hint alone does not reach the bar
        let a = classify_vision_failure(&json!({"message": "something about vision failed"}));
        assert_eq!(a.class, FailureClass::Inconclusive);
        assert!(a.score < 3);

        // provider phrase + weak hint + soft status clears it
        let b = classify_vision_failure(&json!({
            "status": 400,
            "message": "invalid content type. image_url is only supported by certain models"
        }));
        assert_eq!(b.class, FailureClass::Capability);
        assert!(b.score >= 3);
    }

    #[test]
    fn test_bare_400_is_inconclusive() {
        let a = classify_vision_failure(&json!({"status": 400, "message": "bad request"}));
        assert_eq!(a.class, FailureClass::Inconclusive);
        assert_eq!(a.score, 1);
    }

    #[test]
    fn test_signal_walks_two_levels_only() {
        let found = classify_vision_failure(&json!({
            "error": {"cause": {"message": "does not support images"}}
        }));
        assert_eq!(found.class, FailureClass::Capability);

        let too_deep = classify_vision_failure(&json!({
            "error": {"cause": {"error": {"message": "does not support images"}}}
        }));
        assert_eq!(too_deep.class, FailureClass::Inconclusive);
    }

    #[test]
    fn test_plain_string_payload() {
        let a = classify_vision_failure(&json!("rate limit exceeded, retry later"));
        assert_eq!(a.class, FailureClass::TransientOrAuth);
    }

    // ── learner ──

    #[tokio::test]
    async fn test_unknown_without_record() {
        let (learner, _) = setup();
        let res = learner
            .resolve_vision_support("openai", "gpt-4o")
            .await
            .unwrap();
        assert_eq!(res.support, VisionSupport::Unknown);
        assert!(res.should_attempt);
    }

    #[tokio::test]
    async fn test_single_failure_stays_unknown() {
        let (learner, repo) = setup();
        learner
            .record_failure("openai", "gpt-4o", &capability_failure())
            .await
            .unwrap();

        let record = repo.get("openai:gpt-4o").await.unwrap().unwrap();
        assert_eq!(record.state, VisionState::PendingUnsupported);
        assert_eq!(record.failure_count, 1);

        let res = learner
            .resolve_vision_support("openai", "gpt-4o")
            .await
            .unwrap();
        assert_eq!(res.support, VisionSupport::Unknown);
        assert!(res.should_attempt);
    }

    #[tokio::test]
    async fn test_two_failures_confirm_unsupported() {
        let (learner, _) = setup();
        learner
            .record_failure("openai", "gpt-4o", &capability_failure())
            .await
            .unwrap();
        learner
            .record_failure("openai", "gpt-4o", &capability_failure())
            .await
            .unwrap();

        let res = learner
            .resolve_vision_support("openai", "gpt-4o")
            .await
            .unwrap();
        assert_eq!(res.support, VisionSupport::Unsupported);
        assert!(!res.should_attempt);
    }

    #[tokio::test]
    async fn test_failure_then_success_means_supported() {
        let (learner, repo) = setup();
        learner
            .record_failure("openai", "gpt-4o", &capability_failure())
            .await
            .unwrap();
        learner.record_success("openai", "gpt-4o").await.unwrap();

        let record = repo.get("openai:gpt-4o").await.unwrap().unwrap();
        assert_eq!(record.state, VisionState::Supported);
        assert_eq!(record.failure_count, 0);

        let res = learner
            .resolve_vision_support("openai", "gpt-4o")
            .await
            .unwrap();
        assert_eq!(res.support, VisionSupport::Supported);
        assert!(res.should_attempt);
    }

    #[tokio::test]
    async fn test_failure_outside_window_resets_count() {
        let (learner, repo) = setup();
        let now = Utc::now();
        // Hand-crafted pending record whose last failure is outside the
        // sliding window but whose TTL has not lapsed.
        repo.upsert(&VisionCapabilityRecord {
            key: "openai:gpt-4o".to_string(),
            state: VisionState::PendingUnsupported,
            learned_at: now - Duration::hours(25),
            expires_at: now + Duration::hours(1),
            reason: "capability_error_pending".to_string(),
            evidence: vec![],
            failure_count: 1,
            last_failure_at: Some(now - Duration::hours(25)),
        })
        .await
        .unwrap();

        learner
            .record_failure("openai", "gpt-4o", &capability_failure())
            .await
            .unwrap();

        let record = repo.get("openai:gpt-4o").await.unwrap().unwrap();
        assert_eq!(record.failure_count, 1);
        assert_eq!(record.state, VisionState::PendingUnsupported);
    }

    #[tokio::test]
    async fn test_transient_failure_writes_nothing() {
        let (learner, repo) = setup();
        let assessment = learner
            .record_failure(
                "openai",
                "gpt-4o",
                &json!({"status": 503, "message": "overloaded"}),
            )
            .await
            .unwrap();
        assert_eq!(assessment.class, FailureClass::TransientOrAuth);
        assert!(repo.get("openai:gpt-4o").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_unsupported_reads_unknown() {
        let (learner, repo) = setup();
        let now = Utc::now();
        repo.upsert(&VisionCapabilityRecord {
            key: "openai:gpt-4o".to_string(),
            state: VisionState::Unsupported,
            learned_at: now - Duration::days(31),
            expires_at: now - Duration::days(1),
            reason: "capability_error_confirmed".to_string(),
            evidence: vec![],
            failure_count: 2,
            last_failure_at: Some(now - Duration::days(31)),
        })
        .await
        .unwrap();

        let res = learner
            .resolve_vision_support("openai", "gpt-4o")
            .await
            .unwrap();
        assert_eq!(res.support, VisionSupport::Unknown);
        assert!(res.should_attempt);
    }

    #[tokio::test]
    async fn test_key_normalization_in_learner() {
        let (learner, repo) = setup();
        learner
            .record_failure(" OpenAI ", "GPT-4o", &capability_failure())
            .await
            .unwrap();
        assert!(repo.get("openai:gpt-4o").await.unwrap().is_some());
    }
}

//! Policy-match learning from confirmed routing decisions.
//!
//! Every confirmed (ingestion, policy) pair stores a compact feature
//! snapshot of the document. For a new document, the learner scores its
//! features against each policy's history and proposes the best policy
//! when the score clears an adaptive bar: lower with two or more backing
//! samples, higher when a single sample is all the evidence.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use docflow_core::{
    defaults, DocumentFeatures, FeedbackRepository, NewPolicyFeedback, PolicySuggestion, Result,
};

use crate::conditions::extension_of;

/// Entity keys read as the document issuer, in lookup order.
const ISSUER_ALIASES: [&str; 5] = ["issuer", "vendor", "merchant", "store_name", "sender"];

/// Entity keys read as the document type, in lookup order.
const DOC_TYPE_ALIASES: [&str; 4] = ["document_type", "doc_type", "type", "category"];

/// Build the feature snapshot for one document.
///
/// Tokens come from the file name, the scalar entity values, and the
/// leading text window; they are lowercased, deduplicated in first-seen
/// order, and capped.
pub fn extract_features(
    filename: &str,
    mime_type: &str,
    entities: &Map<String, JsonValue>,
    text: &str,
) -> DocumentFeatures {
    let mut tokens = Vec::new();
    let mut seen = HashSet::new();

    push_tokens(base_name(filename), &mut tokens, &mut seen);
    let mut scalars = Vec::new();
    flatten_scalars(entities, 0, &mut scalars);
    for scalar in &scalars {
        push_tokens(scalar, &mut tokens, &mut seen);
    }
    let window: String = text.chars().take(defaults::LEARNER_TEXT_CHARS).collect();
    push_tokens(&window, &mut tokens, &mut seen);

    DocumentFeatures {
        extension: extension_of(filename),
        mime_type: normalize(mime_type),
        document_type: alias_lookup(entities, &DOC_TYPE_ALIASES),
        issuer: alias_lookup(entities, &ISSUER_ALIASES),
        tokens,
    }
}

fn base_name(filename: &str) -> &str {
    filename.rsplit(['/', '\\']).next().unwrap_or(filename)
}

fn push_tokens(source: &str, tokens: &mut Vec<String>, seen: &mut HashSet<String>) {
    for raw in source.split(|c: char| !c.is_alphanumeric()) {
        if tokens.len() >= defaults::LEARNER_MAX_TOKENS {
            return;
        }
        if raw.chars().count() < 3 {
            continue;
        }
        let token = raw.to_lowercase();
        if seen.insert(token.clone()) {
            tokens.push(token);
        }
    }
}

/// Collect scalar values out of the entity tree, down to the depth limit.
fn flatten_scalars(entities: &Map<String, JsonValue>, depth: usize, out: &mut Vec<String>) {
    if depth >= defaults::LEARNER_FLATTEN_DEPTH {
        return;
    }
    for value in entities.values() {
        match value {
            JsonValue::String(s) => out.push(s.clone()),
            JsonValue::Number(n) => out.push(n.to_string()),
            JsonValue::Bool(b) => out.push(b.to_string()),
            JsonValue::Array(items) => {
                for item in items {
                    if let Some(s) = item.as_str() {
                        out.push(s.to_string());
                    }
                }
            }
            JsonValue::Object(map) => flatten_scalars(map, depth + 1, out),
            JsonValue::Null => {}
        }
    }
}

fn normalize(value: &str) -> Option<String> {
    let cleaned = value.trim().to_lowercase();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn alias_lookup(entities: &Map<String, JsonValue>, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        if let Some(value) = entities.get(*alias).and_then(|v| v.as_str()) {
            if let Some(cleaned) = normalize(value) {
                return Some(cleaned);
            }
        }
    }
    None
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    let left: HashSet<&str> = a.iter().map(String::as_str).collect();
    let right: HashSet<&str> = b.iter().map(String::as_str).collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

/// Both present and equal earns the bonus, both present and different
/// pays the penalty, either side missing is neutral.
fn match_bonus(a: &Option<String>, b: &Option<String>, bonus: f64, penalty: f64) -> f64 {
    match (a, b) {
        (Some(x), Some(y)) if x == y => bonus,
        (Some(_), Some(_)) => -penalty,
        _ => 0.0,
    }
}

/// Like [`match_bonus`], but substring containment in either direction
/// counts as a match ("invoice" vs "tax invoice").
fn soft_match_bonus(a: &Option<String>, b: &Option<String>, bonus: f64, penalty: f64) -> f64 {
    match (a, b) {
        (Some(x), Some(y)) if x.contains(y.as_str()) || y.contains(x.as_str()) => bonus,
        (Some(_), Some(_)) => -penalty,
        _ => 0.0,
    }
}

fn pair_score(current: &DocumentFeatures, past: &DocumentFeatures) -> f64 {
    let mut score = jaccard(&current.tokens, &past.tokens) * defaults::LEARNER_JACCARD_WEIGHT;
    score += match_bonus(
        &current.extension,
        &past.extension,
        defaults::LEARNER_EXT_BONUS,
        defaults::LEARNER_EXT_PENALTY,
    );
    score += match_bonus(
        &current.mime_type,
        &past.mime_type,
        defaults::LEARNER_MIME_BONUS,
        defaults::LEARNER_MIME_PENALTY,
    );
    score += soft_match_bonus(
        &current.document_type,
        &past.document_type,
        defaults::LEARNER_DOCTYPE_BONUS,
        defaults::LEARNER_DOCTYPE_PENALTY,
    );
    score += soft_match_bonus(
        &current.issuer,
        &past.issuer,
        defaults::LEARNER_ISSUER_BONUS,
        defaults::LEARNER_ISSUER_PENALTY,
    );
    score.clamp(0.0, 1.0)
}

/// Scores documents against confirmed routing history.
pub struct PolicyLearner {
    feedback: Arc<dyn FeedbackRepository>,
}

impl PolicyLearner {
    pub fn new(feedback: Arc<dyn FeedbackRepository>) -> Self {
        Self { feedback }
    }

    /// Record a confirmed (ingestion, policy) routing.
    #[instrument(skip_all, fields(subsystem = "policy", component = "learner", op = "confirm", owner_id = %owner_id, policy_id = %policy_id))]
    pub async fn record_confirmation(
        &self,
        owner_id: Uuid,
        ingestion_id: Uuid,
        policy_id: Uuid,
        features: DocumentFeatures,
    ) -> Result<Uuid> {
        let id = self
            .feedback
            .upsert(NewPolicyFeedback {
                owner_id,
                ingestion_id,
                policy_id,
                features,
            })
            .await?;
        debug!(%ingestion_id, "Recorded policy confirmation");
        Ok(id)
    }

    /// Suggest a policy for a document, when history clears the bar.
    ///
    /// Every feedback row is scored against the document; per policy, the
    /// top sample scores are averaged and a capped count boost rewards
    /// policies with more confirmations.
    #[instrument(skip_all, fields(subsystem = "policy", component = "learner", op = "suggest", owner_id = %owner_id))]
    pub async fn suggest(
        &self,
        owner_id: Uuid,
        features: &DocumentFeatures,
    ) -> Result<Option<PolicySuggestion>> {
        let history = self
            .feedback
            .list_for_owner(owner_id, defaults::INTERNAL_FETCH_LIMIT)
            .await?;
        if history.is_empty() {
            return Ok(None);
        }

        let mut per_policy: HashMap<Uuid, Vec<f64>> = HashMap::new();
        for row in &history {
            per_policy
                .entry(row.policy_id)
                .or_default()
                .push(pair_score(features, &row.features));
        }

        let mut best: Option<PolicySuggestion> = None;
        for (policy_id, mut scores) in per_policy {
            scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
            let samples = scores.len();
            let top: Vec<f64> = scores
                .into_iter()
                .take(defaults::LEARNER_TOP_SAMPLES)
                .collect();
            let avg = top.iter().sum::<f64>() / top.len() as f64;
            let boost = defaults::LEARNER_COUNT_BOOST_CAP
                .min(samples.saturating_sub(1) as f64 * defaults::LEARNER_COUNT_BOOST_STEP);
            let score = (avg + boost).clamp(0.0, 1.0);
            debug!(%policy_id, samples, score, "Scored candidate policy");
            if best.as_ref().map(|b| score > b.score).unwrap_or(true) {
                best = Some(PolicySuggestion {
                    policy_id,
                    score,
                    samples,
                });
            }
        }

        let candidate = match best {
            Some(candidate) => candidate,
            None => return Ok(None),
        };
        let bar = if candidate.samples >= 2 {
            defaults::LEARNER_MULTI_SAMPLE_BAR
        } else {
            defaults::LEARNER_SINGLE_SAMPLE_BAR
        };
        if candidate.score >= bar {
            info!(
                policy_id = %candidate.policy_id,
                score = candidate.score,
                samples = candidate.samples,
                "Suggesting policy from routing history"
            );
            Ok(Some(candidate))
        } else {
            debug!(
                policy_id = %candidate.policy_id,
                score = candidate.score,
                bar,
                "Best candidate stayed below the bar"
            );
            Ok(None)
        }
    }
}

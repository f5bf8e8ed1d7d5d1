//! Per-condition evaluation and policy-level match logic.
//!
//! Keyword and filename conditions are plain substring tests. File-type and
//! MIME conditions compare the document's extension against the condition
//! value, accepting MIME-subtype equivalents (`text/plain` counts as `txt`).
//! Semantic and LLM-verify conditions ask the language model a yes/no
//! question about the document and gate on the returned confidence; any
//! model or parse failure is a non-match, never an error.

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use docflow_core::{
    defaults, ChatMessage, ChatOptions, ConditionValue, LanguageModelService, MatchCondition,
    MatchStrategy, Policy, TraceStep,
};
use docflow_inference::parse_json_object;

/// Document fields visible to condition evaluation.
#[derive(Debug, Clone, Copy)]
pub struct DocumentView<'a> {
    pub filename: &'a str,
    pub mime_type: &'a str,
    /// Working text, including any appended `[Extracted fields]` section.
    pub text: &'a str,
}

/// Evaluate one condition, appending a trace step with the verdict.
pub async fn evaluate_condition(
    condition: &MatchCondition,
    doc: DocumentView<'_>,
    models: &dyn LanguageModelService,
    opts: &ChatOptions,
    trace: &mut Vec<TraceStep>,
) -> bool {
    let (passed, detail) = match condition {
        MatchCondition::Keyword {
            value,
            case_sensitive,
        } => substring_check(doc.text, value, *case_sensitive, "text"),
        MatchCondition::Filename {
            value,
            case_sensitive,
        } => substring_check(doc.filename, value, *case_sensitive, "filename"),
        MatchCondition::FileType { value } => file_type_check(doc, value),
        MatchCondition::MimeType { value } => mime_type_check(doc, value),
        MatchCondition::LlmVerify {
            question,
            threshold,
        }
        | MatchCondition::Semantic {
            question,
            threshold,
        } => model_verify(question, *threshold, doc, models, opts).await,
    };

    let verdict = if passed { "passed" } else { "failed" };
    trace.push(TraceStep::new(
        "policy_match",
        format!("Condition {} {}: {}", condition.kind(), verdict, detail),
    ));
    debug!(condition = condition.kind(), passed, "Condition evaluated");
    passed
}

/// Evaluate a policy's conditions under its strategy.
///
/// `ALL` short-circuits on the first failing condition, `ANY` on the first
/// passing one. A policy with no conditions never matches.
pub async fn policy_matches(
    policy: &Policy,
    doc: DocumentView<'_>,
    models: &dyn LanguageModelService,
    opts: &ChatOptions,
    trace: &mut Vec<TraceStep>,
) -> bool {
    let conditions = &policy.match_spec.conditions;
    if conditions.is_empty() {
        trace.push(TraceStep::new(
            "policy_match",
            format!("Policy \"{}\" has no conditions, skipping", policy.name),
        ));
        return false;
    }

    match policy.match_spec.strategy {
        MatchStrategy::All => {
            for condition in conditions {
                if !evaluate_condition(condition, doc, models, opts, trace).await {
                    return false;
                }
            }
            true
        }
        MatchStrategy::Any => {
            for condition in conditions {
                if evaluate_condition(condition, doc, models, opts, trace).await {
                    return true;
                }
            }
            false
        }
    }
}

fn substring_check(
    haystack: &str,
    value: &ConditionValue,
    case_sensitive: bool,
    target: &str,
) -> (bool, String) {
    let folded;
    let haystack = if case_sensitive {
        haystack
    } else {
        folded = haystack.to_lowercase();
        &folded
    };
    for candidate in value.candidates() {
        let needle = if case_sensitive {
            candidate.to_string()
        } else {
            candidate.to_lowercase()
        };
        if !needle.is_empty() && haystack.contains(&needle) {
            return (true, format!("found \"{}\" in {}", candidate, target));
        }
    }
    (false, format!("no candidate value found in {}", target))
}

/// Lower-cased extension of a file name, if it has one.
pub(crate) fn extension_of(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Extension equivalent of a MIME type's subtype.
///
/// Most subtypes already read as extensions (`application/pdf`, `text/csv`);
/// the match arms cover the ones that do not.
fn subtype_extension(mime: &str) -> Option<String> {
    let subtype = mime.split('/').nth(1)?.trim().to_lowercase();
    if subtype.is_empty() {
        return None;
    }
    Some(match subtype.as_str() {
        "plain" => "txt".to_string(),
        "markdown" | "x-markdown" => "md".to_string(),
        "jpeg" => "jpg".to_string(),
        "msword" => "doc".to_string(),
        other => other.to_string(),
    })
}

fn normalize_ext(value: &str) -> String {
    value.trim().trim_start_matches('.').to_lowercase()
}

fn file_type_check(doc: DocumentView<'_>, value: &str) -> (bool, String) {
    let want = normalize_ext(value);
    if want.is_empty() {
        return (false, "empty file type value".to_string());
    }
    if extension_of(doc.filename).as_deref() == Some(want.as_str()) {
        return (true, format!("extension .{} matches", want));
    }
    if subtype_extension(doc.mime_type).as_deref() == Some(want.as_str()) {
        return (
            true,
            format!("MIME type {} is equivalent to .{}", doc.mime_type, want),
        );
    }
    (
        false,
        format!("neither extension nor MIME type matches .{}", want),
    )
}

fn mime_type_check(doc: DocumentView<'_>, value: &str) -> (bool, String) {
    let want = value.trim().to_lowercase();
    if want.is_empty() {
        return (false, "empty MIME type value".to_string());
    }
    if doc.mime_type.eq_ignore_ascii_case(&want) {
        return (true, format!("MIME type {} matches", want));
    }
    if let (Some(equiv), Some(ext)) = (subtype_extension(&want), extension_of(doc.filename)) {
        if equiv == ext {
            return (
                true,
                format!("extension .{} is equivalent to {}", ext, want),
            );
        }
    }
    (
        false,
        format!("MIME type {} does not match {}", doc.mime_type, want),
    )
}

async fn model_verify(
    question: &str,
    threshold: f32,
    doc: DocumentView<'_>,
    models: &dyn LanguageModelService,
    opts: &ChatOptions,
) -> (bool, String) {
    let excerpt: String = doc.text.chars().take(defaults::CONDITION_TEXT_CHARS).collect();
    let prompt = format!(
        r#"Answer a yes/no question about the document below.

Question: {}

Respond with exactly one JSON object and nothing else:
{{"result": true or false, "confidence": 0.0 to 1.0}}

Document:
{}"#,
        question, excerpt
    );

    let messages = [ChatMessage::user(prompt)];
    let reply = match models.chat_complete(&messages, opts).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Model verification unavailable, treating as non-match");
            return (false, format!("model unavailable: {}", e));
        }
    };

    let Some(parsed) = parse_json_object(&reply) else {
        warn!("Model verification reply had no JSON object, treating as non-match");
        return (false, "no JSON object in model reply".to_string());
    };
    let result = parsed
        .get("result")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    let confidence = parsed
        .get("confidence")
        .and_then(JsonValue::as_f64)
        .unwrap_or(0.0) as f32;

    if result && confidence >= threshold {
        (
            true,
            format!(
                "answered yes with confidence {:.2} (threshold {:.2})",
                confidence, threshold
            ),
        )
    } else if result {
        (
            false,
            format!(
                "answered yes but confidence {:.2} is below threshold {:.2}",
                confidence, threshold
            ),
        )
    } else {
        (false, "answered no".to_string())
    }
}

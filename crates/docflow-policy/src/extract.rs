//! Structured field extraction.
//!
//! Two passes share the same prompt-and-parse machinery: the baseline pass
//! runs on every document with a policy-independent schema and never fails,
//! and the policy-scoped pass runs the matching policy's extract spec. Both
//! send a bounded text window and expect a single JSON object back.

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, instrument, warn};

use docflow_core::{
    defaults, BaselineExtraction, BaselineField, ChatMessage, ChatOptions, ExtractField,
    LanguageModelService,
};
use docflow_inference::parse_json_object;

use crate::variables::stringify;

/// Run the policy-independent baseline extraction.
///
/// Degrades to an empty result on any model or parse failure; the pipeline
/// treats baseline entities as best-effort enrichment.
#[instrument(skip_all, fields(subsystem = "policy", component = "extract", op = "baseline"))]
pub async fn baseline_extract(
    text: &str,
    context: Option<&str>,
    schema: &[BaselineField],
    models: &dyn LanguageModelService,
    opts: &ChatOptions,
) -> BaselineExtraction {
    let field_lines = schema
        .iter()
        .filter(|f| f.enabled)
        .map(|f| format!("- {} ({}): {}", f.key, f.field_type.as_str(), f.description))
        .collect::<Vec<_>>()
        .join("\n");
    if field_lines.is_empty() {
        return BaselineExtraction::default();
    }

    let excerpt: String = text.chars().take(defaults::EXTRACT_TEXT_CHARS).collect();
    let context_block = context
        .map(|c| format!("Context: {}\n\n", c))
        .unwrap_or_default();
    let prompt = format!(
        r#"Extract the listed fields from the document. Use null for any field
that is not present. List keys you are not confident about in
"uncertain_fields".

Fields:
{}

{}Respond with exactly one JSON object and nothing else:
{{"entities": {{"<field key>": <value>}}, "uncertain_fields": ["<field key>"]}}

Document:
{}"#,
        field_lines, context_block, excerpt
    );

    let messages = [ChatMessage::user(prompt)];
    let reply = match models.chat_complete(&messages, opts).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Baseline extraction unavailable, continuing without entities");
            return BaselineExtraction::default();
        }
    };

    let Some(entities) = entities_from_reply(&reply) else {
        warn!("Baseline extraction reply had no JSON object");
        return BaselineExtraction::default();
    };
    let uncertain_fields: Vec<String> = parse_json_object(&reply)
        .and_then(|v| v.get("uncertain_fields").cloned())
        .and_then(|v| match v {
            JsonValue::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default();

    debug!(
        entity_count = entities.len(),
        uncertain_count = uncertain_fields.len(),
        "Baseline extraction done"
    );
    BaselineExtraction {
        entities,
        uncertain_fields,
    }
}

/// Run a policy's extract spec over the document text.
///
/// Returns an empty map on model or parse failure; the engine decides whether
/// missing required fields make that an error.
#[instrument(skip_all, fields(subsystem = "policy", component = "extract", op = "policy_fields", field_count = fields.len()))]
pub async fn extract_policy_fields(
    text: &str,
    fields: &[ExtractField],
    models: &dyn LanguageModelService,
    opts: &ChatOptions,
) -> Map<String, JsonValue> {
    if fields.is_empty() {
        return Map::new();
    }

    let field_lines = fields
        .iter()
        .map(|f| {
            let requirement = if f.required { "required" } else { "optional" };
            format!(
                "- {} ({}, {}): {}",
                f.key,
                f.field_type.as_str(),
                requirement,
                f.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let excerpt: String = text.chars().take(defaults::EXTRACT_TEXT_CHARS).collect();
    let prompt = format!(
        r#"Extract the listed fields from the document. Use null for any field
that is not present. Dates use the YYYY-MM-DD layout.

Fields:
{}

Respond with exactly one JSON object keyed by field name and nothing else.

Document:
{}"#,
        field_lines, excerpt
    );

    let messages = [ChatMessage::user(prompt)];
    let reply = match models.chat_complete(&messages, opts).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Policy field extraction unavailable");
            return Map::new();
        }
    };

    match entities_from_reply(&reply) {
        Some(extracted) => {
            debug!(extracted_count = extracted.len(), "Policy field extraction done");
            extracted
        }
        None => {
            warn!("Policy field extraction reply had no JSON object");
            Map::new()
        }
    }
}

/// Required fields the extraction failed to produce (absent or null).
pub fn missing_required_fields(
    fields: &[ExtractField],
    extracted: &Map<String, JsonValue>,
) -> Vec<String> {
    fields
        .iter()
        .filter(|f| f.required)
        .filter(|f| extracted.get(&f.key).map(JsonValue::is_null).unwrap_or(true))
        .map(|f| f.key.clone())
        .collect()
}

/// Append extraction output as a synthetic document section, so later
/// keyword and semantic conditions can match normalized field values the
/// raw text spells differently.
pub fn append_extracted_section(text: &str, entities: &Map<String, JsonValue>) -> String {
    let lines: Vec<String> = entities
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| format!("{}: {}", key, stringify(value)))
        .collect();
    if lines.is_empty() {
        return text.to_string();
    }
    format!("{}\n\n[Extracted fields]\n{}\n", text, lines.join("\n"))
}

/// Parse the field map out of a model reply.
///
/// Accepts the documented `{"entities": {...}}` wrapper, and falls back to
/// treating the whole object as the field map; some models reply with the
/// fields at the top level.
fn entities_from_reply(reply: &str) -> Option<Map<String, JsonValue>> {
    let parsed = parse_json_object(reply)?;
    let object = parsed.as_object()?;
    if let Some(JsonValue::Object(inner)) = object.get("entities") {
        return Some(inner.clone());
    }
    let mut map = object.clone();
    map.remove("uncertain_fields");
    Some(map)
}

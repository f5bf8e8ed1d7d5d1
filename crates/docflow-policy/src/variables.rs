//! Variable derivation and `{key}` interpolation for action configs.
//!
//! Every extracted field is stringified into a flat variable map, then
//! field-level transformers add derived keys (`invoice_date` with a
//! `get_year` transformer yields `invoice_date_year`). Action handlers
//! interpolate `{key}` tokens in their config strings against this map.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

use docflow_core::{ExtractField, TransformOp};

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").unwrap());

/// Date layouts accepted by transformers, tried in order.
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%m/%d/%Y"];

/// Render one extracted value the way interpolation sees it.
///
/// Strings pass through unquoted; everything else uses its JSON rendering.
pub fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build the interpolation map: stringified fields first, then derived keys
/// from each field's transformers. Null fields contribute nothing.
pub fn build_variables(
    fields: &serde_json::Map<String, JsonValue>,
    spec: &[ExtractField],
) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for (key, value) in fields {
        if value.is_null() {
            continue;
        }
        vars.insert(key.clone(), stringify(value));
    }
    for field in spec {
        let Some(raw) = vars.get(&field.key).cloned() else {
            continue;
        };
        for transformer in &field.transformers {
            let Some(derived) = apply_transform(transformer.op, &raw) else {
                continue;
            };
            let name = transformer
                .output
                .clone()
                .unwrap_or_else(|| format!("{}_{}", field.key, transformer.op.suffix()));
            vars.insert(name, derived);
        }
    }
    vars
}

/// Run one transformer over a raw field value. Returns `None` when the value
/// does not parse as a date.
pub fn apply_transform(op: TransformOp, raw: &str) -> Option<String> {
    let date = parse_date(raw)?;
    let rendered = match op {
        TransformOp::GetYear => date.format("%Y"),
        TransformOp::GetMonth => date.format("%m"),
        TransformOp::GetMonthName => date.format("%B"),
    };
    Some(rendered.to_string())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Replace `{key}` tokens from the variable map. Unknown tokens stay literal.
pub fn interpolate(template: &str, vars: &HashMap<String, String>) -> String {
    TOKEN
        .replace_all(template, |caps: &regex::Captures<'_>| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Interpolate every string leaf of a JSON value, preserving structure.
pub fn interpolate_json(value: &JsonValue, vars: &HashMap<String, String>) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(interpolate(s, vars)),
        JsonValue::Array(items) => {
            JsonValue::Array(items.iter().map(|v| interpolate_json(v, vars)).collect())
        }
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_json(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

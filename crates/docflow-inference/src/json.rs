//! Balanced-brace JSON extraction from model replies.
//!
//! Models frequently wrap JSON in prose or code fences. These helpers pull
//! the first balanced `{...}` block out of a reply without assuming the
//! reply is valid JSON end to end.

use serde_json::Value as JsonValue;

/// Extract the first balanced `{...}` block from `reply`.
///
/// Brace counting is string-aware: braces inside JSON string literals
/// (including escaped quotes) do not affect nesting depth. Returns `None`
/// when no balanced block exists.
pub fn extract_json_block(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let bytes = reply.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&reply[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the first balanced JSON object out of a model reply.
///
/// Scans successive `{` positions so a stray brace in leading prose does not
/// mask a valid object later in the reply. Returns `None` when no candidate
/// block parses as a JSON object.
pub fn parse_json_object(reply: &str) -> Option<JsonValue> {
    let mut rest = reply;
    let mut base = 0usize;
    while let Some(block) = extract_json_block(rest) {
        if let Ok(value) = serde_json::from_str::<JsonValue>(block) {
            return Some(value);
        }
        // Skip past this opening brace and rescan
        let block_start = rest.find('{')? + base;
        base = block_start + 1;
        rest = &reply[base..];
    }
    None
}

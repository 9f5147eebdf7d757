//! Table-driven payload shaping: each section's rule decides which fields
//! of its elements are surfaced and how many elements are spelled out
//! before the rest collapses into a count.

use std::fmt::Write;

use serde_json::Value;

use crate::chunk::SectionChunk;
use crate::config::PayloadRule;

#[derive(Debug)]
pub struct BuiltPayload {
    pub text: String,
    pub truncated: bool,
}

/// Keep only the rule's fields of an object; non-objects and empty rules
/// pass through whole.
fn project(value: &Value, fields: &[String]) -> Value {
    if fields.is_empty() {
        return value.clone();
    }
    match value.as_object() {
        Some(obj) => {
            let mut out = serde_json::Map::new();
            for field in fields {
                if let Some(v) = obj.get(field) {
                    out.insert(field.clone(), v.clone());
                }
            }
            Value::Object(out)
        }
        None => value.clone(),
    }
}

/// Render one chunk into the bounded prompt text handed to the analysis
/// service. Oversized output is hard-truncated at `max_chars`; the caller
/// logs the truncation.
pub fn build_payload(
    rule: &PayloadRule,
    chunk: &SectionChunk,
    max_chars: usize,
) -> Result<BuiltPayload, serde_json::Error> {
    let mut text = String::new();
    let _ = writeln!(text, "Section: {}", chunk.display_name);
    if chunk.total > 1 {
        let _ = writeln!(text, "Chunk {} of {}", chunk.index + 1, chunk.total);
    }

    match chunk.elements() {
        Some(elements) => {
            let _ = writeln!(text, "{} entries.", elements.len());
            let shown = if rule.sample_size == 0 {
                elements.len()
            } else {
                rule.sample_size.min(elements.len())
            };
            for element in elements.iter().take(shown) {
                let projected = project(element, &rule.summary_fields);
                text.push_str(&serde_json::to_string(&projected)?);
                text.push('\n');
            }
            if shown < elements.len() {
                let _ = writeln!(text, "... and {} more entries.", elements.len() - shown);
            }
        }
        None => {
            let projected = project(&chunk.value, &rule.summary_fields);
            text.push_str(&serde_json::to_string_pretty(&projected)?);
            text.push('\n');
        }
    }

    let truncated = truncate_chars(&mut text, max_chars);
    Ok(BuiltPayload { text, truncated })
}

/// Truncate to at most `max_chars` characters on a char boundary.
fn truncate_chars(text: &mut String, max_chars: usize) -> bool {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            text.truncate(byte_idx);
            true
        }
        None => false,
    }
}

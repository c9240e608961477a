//! Embedded structured data (JSON-LD)
//!
//! Searches every parsed JSON block depth-first for one of the field's JSON
//! keys. schema.org `PropertyValue` objects (`{"name": ..., "value": ...}`)
//! match on their `name` against the field labels.

use serde_json::Value;

use super::{Document, ExtractionStrategy, FieldSpec};
use crate::models::ExtractionMethod;

/// Deepest nesting searched
const MAX_DEPTH: usize = 16;

#[derive(Debug, Default)]
pub struct StructuredDataStrategy;

impl StructuredDataStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionStrategy for StructuredDataStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::StructuredData
    }

    fn attempt(&self, doc: &Document, field: &FieldSpec) -> Option<String> {
        doc.json.iter().find_map(|value| find_value(value, field, 0))
    }
}

fn find_value(value: &Value, field: &FieldSpec, depth: usize) -> Option<String> {
    if depth > MAX_DEPTH {
        return None;
    }

    match value {
        Value::Object(map) => {
            for (key, v) in map {
                let key_matches = key == field.name
                    || field.json_keys.iter().any(|k| k.eq_ignore_ascii_case(key));
                if key_matches {
                    if let Some(s) = scalar(v) {
                        return Some(s);
                    }
                }
            }

            if let (Some(name), Some(v)) = (map.get("name").and_then(Value::as_str), map.get("value"))
            {
                let name = name.trim();
                let name_matches = name == field.name
                    || field.labels.iter().any(|l| l.eq_ignore_ascii_case(name));
                if name_matches {
                    if let Some(s) = scalar(v) {
                        return Some(s);
                    }
                }
            }

            map.values().find_map(|v| find_value(v, field, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| find_value(v, field, depth + 1)),
        _ => None,
    }
}

/// Scalar text of a JSON value; `{"value": x}` wrappers are unwrapped
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("value").and_then(scalar),
        _ => None,
    }
}

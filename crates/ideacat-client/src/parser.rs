//! Classifier response parsing

use std::collections::HashSet;

use ideacat_core::{Batch, CategorizedItem};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::ParseError;

lazy_static! {
    static ref OPENING_FENCE: Regex = Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n?").unwrap();
    static ref CLOSING_FENCE: Regex = Regex::new(r"\r?\n?```\s*$").unwrap();
}

/// Remove a surrounding markdown code fence, if any
pub fn strip_code_fence(raw: &str) -> &str {
    let text = raw.trim();
    if !text.starts_with("```") {
        return text;
    }

    let start = OPENING_FENCE.find(text).map_or(0, |m| m.end());
    let body = &text[start..];
    let end = CLOSING_FENCE.find(body).map_or(body.len(), |m| m.start());
    body[..end].trim()
}

/// Turn raw classifier text into `(id, category)` pairs for `batch`.
///
/// Invalid JSON fails the whole batch. Individual entries that lack an id or
/// category, name an id outside the batch, or repeat an id are skipped.
pub fn parse_response(raw: &str, batch: &Batch) -> Result<Vec<CategorizedItem>, ParseError> {
    let cleaned = strip_code_fence(raw);

    let value: Value = serde_json::from_str(cleaned).map_err(|e| {
        debug!("Batch {} raw response: {}", batch.number, raw);
        ParseError::Malformed(e.to_string())
    })?;

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(map) => object_entries(map).ok_or_else(|| {
            ParseError::Malformed("expected a JSON array of results".to_string())
        })?,
        _ => {
            return Err(ParseError::Malformed(
                "expected a JSON array of results".to_string(),
            ));
        }
    };

    let expected: HashSet<&str> = batch.items.iter().map(|item| item.id.as_str()).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut results = Vec::with_capacity(entries.len());

    for entry in &entries {
        let id = entry.get("_id").or_else(|| entry.get("id")).and_then(id_string);
        let category = entry
            .get("category")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty());

        let (id, category) = match (id, category) {
            (Some(id), Some(category)) => (id, category),
            _ => {
                warn!(
                    "Batch {}: missing id or category in response entry: {}",
                    batch.number, entry
                );
                continue;
            }
        };

        if !expected.contains(id.as_str()) {
            warn!("Batch {}: response names unknown id {}", batch.number, id);
            continue;
        }

        if !seen.insert(id.clone()) {
            warn!("Batch {}: duplicate entry for id {}", batch.number, id);
            continue;
        }

        results.push(CategorizedItem {
            id,
            category: category.to_string(),
        });
    }

    Ok(results)
}

/// Keys models commonly wrap the result array in
const WRAPPER_KEYS: &[&str] = &["ideas", "results", "items", "data"];

/// Entries from an object reply: either a single result entry, or an array
/// wrapped in an object such as `{"ideas": [...]}`.
fn object_entries(mut map: Map<String, Value>) -> Option<Vec<Value>> {
    let has_id = map.contains_key("_id") || map.contains_key("id");
    if has_id && map.contains_key("category") {
        return Some(vec![Value::Object(map)]);
    }

    for key in WRAPPER_KEYS {
        if let Some(Value::Array(entries)) = map.remove(*key) {
            return Some(entries);
        }
    }

    // Any other key, preferring arrays of objects over arrays of labels
    let mut fallback = None;
    for (_, value) in map {
        if let Value::Array(entries) = value {
            if entries.iter().any(Value::is_object) {
                return Some(entries);
            }
            if fallback.is_none() {
                fallback = Some(entries);
            }
        }
    }
    fallback
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{BuildError, OracleWorkflow};

/// Raw oracle text kept in errors is cut to this many characters.
pub(crate) const RAW_EXCERPT_CHARS: usize = 500;

/// Extract JSON from text that may be wrapped in markdown code fences.
pub(crate) fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim();
        }
    }
    trimmed
}

/// JSON objects in `text`, in the order they should be tried: the fenced
/// block (or the whole text) first, then every `{` from which a complete
/// object parses. The error is the last parse failure when nothing parsed.
fn json_objects(text: &str) -> Result<Vec<Value>, String> {
    let candidate = extract_json(text);
    let mut objects = Vec::new();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
        objects.push(value);
    }

    let mut last_error = None;
    for haystack in [candidate, text] {
        for (start, _) in haystack.match_indices('{') {
            let mut stream =
                serde_json::Deserializer::from_str(&haystack[start..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value @ Value::Object(_))) => {
                    if !objects.contains(&value) {
                        objects.push(value);
                    }
                }
                Some(Err(e)) => last_error = Some(e.to_string()),
                _ => {}
            }
        }
    }

    if objects.is_empty() {
        return Err(last_error.unwrap_or_else(|| "no JSON object found".to_string()));
    }
    Ok(objects)
}

/// First JSON object in `text`: the fenced block if there is one, otherwise
/// the first `{` from which a complete object parses.
pub(crate) fn first_json_object(text: &str) -> Result<Value, String> {
    json_objects(text).map(|mut objects| objects.swap_remove(0))
}

/// Parse oracle text into the workflow description. Objects that do not
/// have the workflow shape (inline examples in surrounding prose) are
/// skipped. Never guesses: text without a usable object fails with
/// `OracleResponseUnparsable`, carrying the first shape error.
pub fn parse_oracle_response(text: &str) -> Result<OracleWorkflow, BuildError> {
    let objects = json_objects(text).map_err(|reason| unparsable(text, reason))?;
    let mut first_error = None;
    for value in objects {
        match serde_json::from_value::<OracleWorkflow>(value) {
            Ok(workflow) => return Ok(workflow),
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }
    Err(unparsable(
        text,
        first_error.unwrap_or_else(|| "no JSON object found".to_string()),
    ))
}

pub(crate) fn unparsable(raw: &str, reason: impl Into<String>) -> BuildError {
    BuildError::OracleResponseUnparsable {
        raw: truncate_chars(raw, RAW_EXCERPT_CHARS),
        reason: reason.into(),
    }
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

pub(crate) fn truncate_intent(intent: &str) -> String {
    let intent = intent.trim();
    if intent.len() <= 50 {
        return intent.to_string();
    }
    // Find the last char boundary at or before byte 47, leaving room for "..."
    let mut end = 47;
    while end > 0 && !intent.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &intent[..end])
}

/// Parse a slice of raw JSON values into typed items, skipping malformed
/// entries with warnings. Labels come from `"id"` or `"source"` when present,
/// otherwise the array index.
pub(crate) fn parse_lenient<T: DeserializeOwned>(raw: &[Value]) -> (Vec<T>, Vec<String>) {
    let mut items = Vec::new();
    let mut warnings = Vec::new();
    for (i, val) in raw.iter().enumerate() {
        match serde_json::from_value::<T>(val.clone()) {
            Ok(item) => items.push(item),
            Err(e) => {
                let label = val
                    .get("id")
                    .and_then(|v| v.as_str())
                    .or_else(|| val.get("source").and_then(|v| v.as_str()))
                    .map(String::from)
                    .unwrap_or_else(|| format!("#{}", i));
                warnings.push(format!("'{}' skipped (malformed): {}", label, e));
            }
        }
    }
    (items, warnings)
}

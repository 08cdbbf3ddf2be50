use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::taxonomy::{self, KindFamily};

/// Placeholder URL for HTTP calls without one. The `.invalid` TLD is
/// reserved and never resolves.
pub const PLACEHOLDER_URL: &str = "https://example.invalid";
pub const DEFAULT_METHOD: &str = "GET";
pub const DEFAULT_CRON: &str = "0 9 * * *";
pub const DEFAULT_CODE: &str = "return items;";

/// Keys whose values must be objects; a string under one of them is dropped.
const OBJECT_KEYS: &[&str] = &["headers", "parameters", "options"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectedDefault {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SanitizedParameters {
    pub parameters: Map<String, Value>,
    pub injected: Vec<InjectedDefault>,
}

pub fn default_conditions() -> Value {
    json!({
        "string": [{
            "value1": "={{$json.status}}",
            "operation": "equal",
            "value2": "success"
        }]
    })
}

/// Clean one node's parameter payload and back-fill the fields its kind
/// cannot run without. Never fails.
pub fn sanitize_parameters(kind: &str, raw: &Value) -> SanitizedParameters {
    let mut parameters = match raw {
        Value::Object(map) => clean_object(map),
        _ => Map::new(),
    };

    let mut injected = Vec::new();
    let mut fill = |params: &mut Map<String, Value>, field: &str, value: Value| {
        if is_blank(params.get(field)) {
            params.insert(field.to_string(), value.clone());
            injected.push(InjectedDefault {
                field: field.to_string(),
                value,
            });
        }
    };

    match taxonomy::family(kind) {
        Some(KindFamily::HttpCall) => {
            fill(&mut parameters, "method", Value::from(DEFAULT_METHOD));
            fill(&mut parameters, "url", Value::from(PLACEHOLDER_URL));
        }
        Some(KindFamily::Schedule) => {
            if is_blank(parameters.get("rule")) {
                fill(&mut parameters, "cronExpression", Value::from(DEFAULT_CRON));
            }
        }
        Some(KindFamily::Code) => {
            fill(&mut parameters, taxonomy::code_field(kind), Value::from(DEFAULT_CODE));
        }
        Some(KindFamily::Conditional) => {
            fill(&mut parameters, "conditions", default_conditions());
        }
        Some(KindFamily::Respond) | None => {}
    }

    if !injected.is_empty() {
        tracing::debug!(kind, count = injected.len(), "Injected parameter defaults");
    }

    SanitizedParameters {
        parameters,
        injected,
    }
}

/// Absent, null, blank string, or empty object.
pub(crate) fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

fn clean_object(map: &Map<String, Value>) -> Map<String, Value> {
    let mut cleaned = Map::new();
    for (key, value) in map {
        if OBJECT_KEYS.contains(&key.as_str()) && value.is_string() {
            continue;
        }
        if let Some(value) = clean_value(value) {
            cleaned.insert(key.clone(), value);
        }
    }
    cleaned
}

fn clean_value(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let cleaned = clean_object(map);
            (!cleaned.is_empty()).then_some(Value::Object(cleaned))
        }
        Value::Array(items) => Some(Value::Array(items.iter().filter_map(clean_value).collect())),
        other => Some(other.clone()),
    }
}

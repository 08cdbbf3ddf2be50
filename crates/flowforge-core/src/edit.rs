use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::sanitize::sanitize_parameters;
use crate::taxonomy::{self, KindFamily};
use crate::{Graph, Node, Position};

/// One change to an existing graph, as proposed by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum GraphEdit {
    #[serde(rename = "update_node_parameter")]
    UpdateParameter {
        node_id: String,
        #[serde(rename = "parameter_path")]
        path: String,
        #[serde(rename = "new_value")]
        value: Value,
    },
    #[serde(rename = "update_schedule")]
    SetSchedule {
        /// Falls back to the first schedule node when absent.
        #[serde(default)]
        node_id: Option<String>,
        #[serde(rename = "new_value")]
        cron: String,
    },
    AddNode {
        #[serde(rename = "node_config")]
        node: Value,
    },
    RemoveNode {
        node_id: String,
    },
    #[serde(rename = "change_connection")]
    Connect {
        #[serde(rename = "source_node")]
        source: String,
        #[serde(rename = "target_node")]
        target: String,
    },
    #[serde(rename = "remove_connection")]
    Disconnect {
        #[serde(rename = "source_node")]
        source: String,
        #[serde(rename = "target_node")]
        target: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot set '{path}': {reason}")]
pub struct PathError {
    pub path: String,
    pub reason: String,
}

/// Set a dotted parameter path such as `rule.interval.0.minutes`.
///
/// Numeric segments index into arrays. Missing intermediate objects are
/// created; an out-of-range index or a scalar in the way is an error.
pub fn set_parameter(
    parameters: &mut Map<String, Value>,
    path: &str,
    value: Value,
) -> Result<(), PathError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(PathError {
            path: path.to_string(),
            reason: "empty path segment".to_string(),
        });
    }

    let mut root = Value::Object(std::mem::take(parameters));
    let result = set_at(&mut root, &segments, value).map_err(|reason| PathError {
        path: path.to_string(),
        reason,
    });
    if let Value::Object(map) = root {
        *parameters = map;
    }
    result
}

fn set_at(current: &mut Value, segments: &[&str], value: Value) -> Result<(), String> {
    let Some((head, rest)) = segments.split_first() else {
        return Err("empty path".to_string());
    };

    match current {
        Value::Array(items) => {
            let index: usize = head
                .parse()
                .map_err(|_| format!("'{}' is not an array index", head))?;
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or_else(|| format!("index {} out of range (len {})", index, len))?;
            if rest.is_empty() {
                *slot = value;
                Ok(())
            } else {
                set_at(slot, rest, value)
            }
        }
        Value::Object(map) => {
            if rest.is_empty() {
                map.insert(head.to_string(), value);
                return Ok(());
            }
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if child.is_null() {
                *child = Value::Object(Map::new());
            }
            set_at(child, rest, value)
        }
        _ => Err(format!("'{}' does not point into an object or array", head)),
    }
}

/// Apply edits in order. Edits that cannot be applied are skipped and
/// reported; none of them can leave a dangling connection behind.
pub fn apply_edits(graph: &mut Graph, edits: &[GraphEdit]) -> Vec<String> {
    let mut warnings = Vec::new();
    for edit in edits {
        if let Err(warning) = apply_edit(graph, edit) {
            tracing::warn!("Skipped graph edit: {}", warning);
            warnings.push(warning);
        }
    }
    warnings
}

fn apply_edit(graph: &mut Graph, edit: &GraphEdit) -> Result<(), String> {
    match edit {
        GraphEdit::UpdateParameter {
            node_id,
            path,
            value,
        } => {
            let node = graph
                .find_node_mut(node_id)
                .ok_or_else(|| format!("update: node '{}' not found", node_id))?;
            set_parameter(&mut node.parameters, path, value.clone())
                .map_err(|e| format!("update on '{}': {}", node_id, e))
        }
        GraphEdit::SetSchedule { node_id, cron } => {
            let node = match node_id {
                Some(id) => graph.find_node_mut(id),
                None => graph
                    .nodes
                    .iter_mut()
                    .find(|n| taxonomy::family(&n.kind) == Some(KindFamily::Schedule)),
            }
            .ok_or_else(|| "schedule: no matching schedule node".to_string())?;
            node.parameters
                .insert("cronExpression".to_string(), Value::from(cron.as_str()));
            Ok(())
        }
        GraphEdit::AddNode { node } => {
            let node = node_from_config(graph, node)?;
            graph
                .insert_node(node)
                .map_err(|e| format!("add: {}", e))
        }
        GraphEdit::RemoveNode { node_id } => {
            if graph.remove_node(node_id) {
                Ok(())
            } else {
                Err(format!("remove: node '{}' not found", node_id))
            }
        }
        GraphEdit::Connect { source, target } => {
            for id in [source, target] {
                if !graph.contains_node(id) {
                    return Err(format!("connect: node '{}' not found", id));
                }
            }
            graph.connect(source, target);
            Ok(())
        }
        GraphEdit::Disconnect { source, target } => {
            match graph.connections.remove_edge(source, target) {
                0 => Err(format!("disconnect: no edge {} -> {}", source, target)),
                _ => Ok(()),
            }
        }
    }
}

/// Build a node for an add edit. `id` and `position` are optional; name and
/// type are not.
fn node_from_config(graph: &Graph, config: &Value) -> Result<Node, String> {
    let field = |key: &str| {
        config
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    let name = field("name").ok_or("add: node config has no name")?;
    let kind = field("type").ok_or("add: node config has no type")?;
    let id = field("id")
        .map(str::to_string)
        .unwrap_or_else(|| format!("node_{}", &Uuid::new_v4().simple().to_string()[..8]));

    let position = config
        .get("position")
        .and_then(|p| serde_json::from_value::<Position>(p.clone()).ok())
        .unwrap_or_else(|| Position::grid(graph.nodes.len()));

    let raw_parameters = config.get("parameters").cloned().unwrap_or(Value::Null);
    let sanitized = sanitize_parameters(kind, &raw_parameters);
    Ok(Node::new(id, name, kind, position).with_parameters(sanitized.parameters))
}

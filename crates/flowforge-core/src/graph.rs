use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::{ConnectionMap, ConnectionTarget, ValidationError};

/// A workflow graph as exchanged with the oracle and the workflow store.
///
/// Unknown store fields (`createdAt`, `versionId`, `staticData`, ...) are kept
/// in `extra` so a fetched graph can be written back without losing data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: ConnectionMap,
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default = "default_settings", deserialize_with = "deserialize_settings")]
    pub settings: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Graph {
    fn default() -> Self {
        Self {
            id: None,
            name: "New Workflow".to_string(),
            nodes: vec![],
            connections: ConnectionMap::default(),
            tags: vec![],
            active: false,
            settings: default_settings(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_type_version")]
    pub type_version: Number,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Canvas coordinates. Serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl From<[f64; 2]> for Position {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Position> for [f64; 2] {
    fn from(p: Position) -> Self {
        [p.x, p.y]
    }
}

impl Position {
    /// Default placement for the `index`-th node: four nodes per row.
    pub fn grid(index: usize) -> Self {
        let row = index / 4;
        let col = index % 4;
        Self {
            x: 200.0 + (col as f64) * 300.0,
            y: 200.0 + (row as f64) * 200.0,
        }
    }
}

/// A node record from the oracle is missing one of its identity fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("node '{label}' is malformed: {reason}")]
pub struct MalformedNodeError {
    /// The node id when present, otherwise `#<index>`.
    pub label: String,
    pub reason: String,
}

fn default_type_version() -> Number {
    Number::from(1)
}

fn default_settings() -> Map<String, Value> {
    let mut settings = Map::new();
    settings.insert("executionOrder".to_string(), Value::from("v1"));
    settings
}

fn deserialize_settings<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let settings = Option::<Map<String, Value>>::deserialize(deserializer)?;
    Ok(settings.unwrap_or_else(default_settings))
}

/// Tags arrive either as plain strings or as store objects `{"id", "name"}`.
fn deserialize_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    let mut tags: Vec<String> = Vec::new();
    for value in raw {
        let tag = match value {
            Value::String(s) => Some(s),
            Value::Object(map) => map.get("name").and_then(|n| n.as_str()).map(String::from),
            _ => None,
        };
        if let Some(tag) = tag
            && !tags.contains(&tag)
        {
            tags.push(tag);
        }
    }
    Ok(tags)
}

fn required_str<'a>(raw: &'a Value, field: &str, label: &str) -> Result<&'a str, MalformedNodeError> {
    match raw.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) => Err(MalformedNodeError {
            label: label.to_string(),
            reason: format!("'{}' is empty", field),
        }),
        Some(_) => Err(MalformedNodeError {
            label: label.to_string(),
            reason: format!("'{}' is not a string", field),
        }),
        None => Err(MalformedNodeError {
            label: label.to_string(),
            reason: format!("'{}' is missing", field),
        }),
    }
}

fn parse_position(raw: &Value) -> Option<Position> {
    let items = raw.as_array()?;
    if items.len() != 2 {
        return None;
    }
    let x = items[0].as_f64()?;
    let y = items[1].as_f64()?;
    (x.is_finite() && y.is_finite()).then_some(Position { x, y })
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
        position: Position,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            type_version: default_type_version(),
            position,
            parameters: Map::new(),
            extra: Map::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Build a node from an untrusted oracle record.
    ///
    /// Identity fields are mandatory. The position is cosmetic: an invalid
    /// one is replaced by the grid default for `index` and reported through
    /// the returned warning. Parameters are copied unsanitized.
    pub fn from_oracle(
        index: usize,
        raw: &Value,
    ) -> Result<(Node, Option<String>), MalformedNodeError> {
        let fallback_label = format!("#{}", index);
        if !raw.is_object() {
            return Err(MalformedNodeError {
                label: fallback_label,
                reason: "node record is not an object".to_string(),
            });
        }

        let id = required_str(raw, "id", &fallback_label)?;
        let name = required_str(raw, "name", id)?;
        let kind = required_str(raw, "type", id)?;

        let mut warning = None;
        let position = match raw.get("position") {
            None | Some(Value::Null) => Position::grid(index),
            Some(p) => parse_position(p).unwrap_or_else(|| {
                warning = Some(format!(
                    "Node '{}' has an invalid position {}, using default layout",
                    id, p
                ));
                Position::grid(index)
            }),
        };

        let mut node = Node::new(id.trim(), name.trim(), kind.trim(), position);
        if let Some(version) = raw.get("typeVersion").and_then(|v| v.as_number()) {
            node.type_version = version.clone();
        }
        if let Some(Value::Object(parameters)) = raw.get("parameters") {
            node.parameters = parameters.clone();
        }
        Ok((node, warning))
    }
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a node, keeping insertion order. Ids must be unique.
    pub fn insert_node(&mut self, node: Node) -> Result<(), ValidationError> {
        if self.contains_node(&node.id) {
            return Err(ValidationError::DuplicateNodeId(node.id));
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Remove a node together with every connection touching it.
    /// Returns `false` when no such node exists.
    pub fn remove_node(&mut self, id: &str) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.id != id);
        self.connections.remove_node(id);
        self.nodes.len() != before
    }

    /// Add a `main` edge between two existing nodes. Returns `false` when an
    /// endpoint is unknown or the edge already exists.
    pub fn connect(&mut self, source: &str, target: &str) -> bool {
        if !self.contains_node(source) || !self.contains_node(target) {
            return false;
        }
        self.connections
            .insert(source, ConnectionTarget::main(target))
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }
}

use flowforge_core::{ConnectionMap, Graph, Node};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structural fields of a workflow, the only ones the store accepts on write.
/// Read-only fields (`id`, `active`, `tags`, timestamps) stay out.
#[derive(Debug, Serialize)]
pub struct WorkflowPayload<'a> {
    pub name: &'a str,
    pub nodes: &'a [Node],
    pub connections: &'a ConnectionMap,
    pub settings: &'a Map<String, Value>,
}

impl<'a> From<&'a Graph> for WorkflowPayload<'a> {
    fn from(graph: &'a Graph) -> Self {
        Self {
            name: &graph.name,
            nodes: &graph.nodes,
            connections: &graph.connections,
            settings: &graph.settings,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ActivePatch {
    pub active: bool,
}

/// One page of a list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Workflow as it appears in listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub updated_at: Option<String>,
}

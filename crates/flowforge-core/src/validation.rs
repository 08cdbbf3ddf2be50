use std::collections::HashSet;

use crate::Graph;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Workflow has no nodes")]
    NoNodes,

    #[error("Node id '{0}' is used more than once")]
    DuplicateNodeId(String),

    #[error("Connection {from} -> {to} references a node that does not exist")]
    DanglingConnection { from: String, to: String },
}

/// Structural checks run before every store write.
pub fn validate_graph(graph: &Graph) -> Result<(), ValidationError> {
    if graph.nodes.is_empty() {
        return Err(ValidationError::NoNodes);
    }

    let mut ids = HashSet::new();
    for node in &graph.nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    for (source, target) in graph.connections.edges() {
        if !ids.contains(source) || !ids.contains(target.node.as_str()) {
            return Err(ValidationError::DanglingConnection {
                from: source.to_string(),
                to: target.node.clone(),
            });
        }
    }

    Ok(())
}

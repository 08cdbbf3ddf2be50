//! Connection planning with the oracle in the loop.
//!
//! The oracle proposes edges for an existing graph. An edge is accepted only
//! when both endpoints exist, it is not a self-loop and it is not already
//! present. Rule-based inference then closes whatever gaps remain.

use std::time::Duration;

use flowforge_core::{
    EdgeReason, Graph, Inference, InferencePolicy, InferredEdge, analyze, infer_connections,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::builder::{
    ask_oracle, connection_request, connector_system_prompt, first_json_object, parse_lenient,
};
use crate::{ChatBackend, Message};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionProposal {
    /// Oracle edges first, then rule-inferred ones.
    pub inference: Inference,
    /// How many inferred edges came from the oracle.
    pub oracle_edges: usize,
    pub reasoning: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OracleEdge {
    #[serde(alias = "source", alias = "source_node")]
    from: String,
    #[serde(alias = "target", alias = "target_node")]
    to: String,
}

/// Plan missing connections, preferring oracle-proposed edges. Never fails:
/// any oracle problem degrades to rule-based inference with a warning.
pub async fn plan_connections_with_backend(
    backend: &impl ChatBackend,
    graph: &Graph,
    policy: &InferencePolicy,
) -> ConnectionProposal {
    let mut proposal = ConnectionProposal::default();

    let messages = vec![
        Message::system(connector_system_prompt()),
        Message::user(connection_request(graph)),
    ];

    let edges = match ask_oracle(backend, "Connector", messages, CONNECT_TIMEOUT).await {
        Ok(content) => match first_json_object(&content) {
            Ok(value) => {
                proposal.reasoning = value
                    .get("reasoning")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .filter(|r| !r.trim().is_empty());
                let raw = value
                    .get("connections")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let (edges, warnings) = parse_lenient::<OracleEdge>(&raw);
                proposal.warnings.extend(warnings);
                edges
            }
            Err(reason) => {
                proposal.warnings.push(format!(
                    "Oracle connection plan unparsable, using rules: {}",
                    reason
                ));
                Vec::new()
            }
        },
        Err(e) => {
            proposal.warnings.push(format!(
                "Oracle connection plan unavailable, using rules: {}",
                e
            ));
            Vec::new()
        }
    };

    let mut working = graph.clone();
    let mut accepted = Vec::new();
    for edge in edges {
        let (Some(source), Some(target)) = (
            resolve(&working, &edge.from),
            resolve(&working, &edge.to),
        ) else {
            proposal.warnings.push(format!(
                "Ignored oracle connection {} -> {}: unknown node",
                edge.from, edge.to
            ));
            continue;
        };
        if source == target {
            proposal.warnings.push(format!(
                "Ignored oracle connection {} -> {}: self-loop",
                edge.from, edge.to
            ));
            continue;
        }
        if !working.connections.connect(&source, &target) {
            proposal.warnings.push(format!(
                "Ignored oracle connection {} -> {}: already connected",
                source, target
            ));
            continue;
        }
        accepted.push(InferredEdge {
            source,
            target,
            reason: EdgeReason::Oracle,
        });
    }

    let analysis = analyze(&working);
    let rules = infer_connections(&working, &analysis, policy);
    proposal.oracle_edges = accepted.len();
    accepted.extend(rules.inferred);
    proposal.inference = Inference {
        connections: rules.connections,
        inferred: accepted,
        orphans: rules.orphans,
    };

    if !proposal.warnings.is_empty() {
        warn!(count = proposal.warnings.len(), "Connection planning warnings");
    }
    info!(
        edges = proposal.inference.inferred.len(),
        oracle = proposal.oracle_edges,
        "Planned connections"
    );

    proposal
}

/// Node id for an oracle reference: by id first, then by display name.
fn resolve(graph: &Graph, reference: &str) -> Option<String> {
    let reference = reference.trim();
    graph
        .find_node(reference)
        .or_else(|| graph.nodes.iter().find(|n| n.name == reference))
        .map(|n| n.id.clone())
}

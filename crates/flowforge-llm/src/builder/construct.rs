use flowforge_core::{
    ConnectionTarget, Graph, Node, ValidationError, analyze, apply_inference, apply_repairs,
    detect_defects, infer_connections, layout_by_depth, plan_repairs, sanitize_parameters,
    validate_graph,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::parse::{parse_lenient, truncate_intent};
use super::{AuditedDefault, BuildAudit, BuildError, BuildOptions, MalformedNodePolicy, OracleWorkflow};

/// A connection as the oracle writes it. Endpoints may be ids or names.
#[derive(Debug, Deserialize)]
struct OracleConnection {
    source: String,
    target: String,
    #[serde(default)]
    output: usize,
}

/// Turn a parsed oracle reply into a validated graph.
///
/// Runs node construction, parameter sanitizing, connection resolution,
/// inference, rule repairs and validation. Everything guessed along the way
/// lands in the audit.
pub fn construct_graph(
    workflow: OracleWorkflow,
    prompt: &str,
    options: &BuildOptions,
) -> Result<(Graph, BuildAudit), BuildError> {
    let mut audit = BuildAudit::default();

    let name = workflow
        .workflow_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
        .unwrap_or_else(|| truncate_intent(prompt));
    let mut graph = Graph::new(name);

    for tag in &workflow.tags {
        let tag = match tag {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get("name").and_then(Value::as_str),
            _ => None,
        };
        if let Some(tag) = tag.map(str::trim).filter(|t| !t.is_empty()) {
            graph.add_tag(tag);
        }
    }

    // Ids and names of skipped nodes: edges to them are dropped, not fatal.
    let mut skipped: Vec<String> = Vec::new();

    for (index, raw) in workflow.nodes.iter().enumerate() {
        let mut node = match Node::from_oracle(index, raw) {
            Ok((node, position_warning)) => {
                audit.warnings.extend(position_warning);
                node
            }
            Err(e) => {
                if options.malformed_nodes == MalformedNodePolicy::Reject {
                    return Err(e.into());
                }
                warn!("Skipping malformed node: {}", e);
                audit.warnings.push(format!("Node skipped: {}", e));
                for key in ["id", "name"] {
                    if let Some(label) = raw.get(key).and_then(Value::as_str) {
                        let label = label.trim();
                        if !label.is_empty() {
                            skipped.push(label.to_string());
                        }
                    }
                }
                continue;
            }
        };

        let raw_parameters = raw.get("parameters").unwrap_or(&Value::Null);
        let sanitized = sanitize_parameters(&node.kind, raw_parameters);
        node.parameters = sanitized.parameters;
        audit
            .injected_defaults
            .extend(sanitized.injected.into_iter().map(|d| AuditedDefault {
                node_id: node.id.clone(),
                field: d.field,
                value: d.value,
            }));

        let id = node.id.clone();
        if let Err(e) = graph.insert_node(node) {
            if options.malformed_nodes == MalformedNodePolicy::Reject {
                return Err(e.into());
            }
            audit
                .warnings
                .push(format!("Node '{}' skipped: duplicate id", id));
        }
    }

    if graph.nodes.is_empty() {
        return Err(ValidationError::NoNodes.into());
    }

    let (connections, connection_warnings) =
        parse_lenient::<OracleConnection>(&workflow.connections);
    audit.warnings.extend(connection_warnings);

    for connection in connections {
        let source = resolve_endpoint(&graph, &connection.source);
        let target = resolve_endpoint(&graph, &connection.target);
        match (source, target) {
            (Some(source), Some(target)) => {
                if source == target {
                    audit
                        .warnings
                        .push(format!("Self-connection on '{}' dropped", source));
                    continue;
                }
                let edge = ConnectionTarget {
                    output: connection.output,
                    ..ConnectionTarget::main(target)
                };
                graph.connections.insert(&source, edge);
            }
            (source, _) => {
                let missing = if source.is_none() {
                    connection.source.trim()
                } else {
                    connection.target.trim()
                };
                if skipped.iter().any(|s| s == missing) {
                    audit.warnings.push(format!(
                        "Connection {} -> {} dropped: '{}' was skipped",
                        connection.source, connection.target, missing
                    ));
                    continue;
                }
                return Err(ValidationError::DanglingConnection {
                    from: connection.source,
                    to: connection.target,
                }
                .into());
            }
        }
    }

    let analysis = analyze(&graph);
    let inference = infer_connections(&graph, &analysis, &options.inference);
    if !inference.orphans.is_empty() {
        return Err(BuildError::OrphanNodes(inference.orphans));
    }
    apply_inference(&mut graph, &inference);
    audit.inferred_edges = inference.inferred;

    if options.auto_repair {
        let defects = detect_defects(&graph);
        if !defects.is_empty() {
            let plan = plan_repairs(&defects);
            graph = apply_repairs(&graph, &plan);
            audit.repairs = plan.actions;
        }
    }

    if options.relayout {
        let analysis = analyze(&graph);
        layout_by_depth(&mut graph, &analysis);
    }

    validate_graph(&graph)?;

    debug!(
        injected = audit.injected_defaults.len(),
        inferred = audit.inferred_edges.len(),
        repairs = audit.repairs.len(),
        "Constructed graph"
    );

    Ok((graph, audit))
}

/// Resolve an oracle endpoint by node id, then by node name.
fn resolve_endpoint(graph: &Graph, reference: &str) -> Option<String> {
    let reference = reference.trim();
    graph
        .find_node(reference)
        .or_else(|| graph.nodes.iter().find(|n| n.name == reference))
        .map(|n| n.id.clone())
}

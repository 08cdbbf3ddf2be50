use flowforge_core::{Defect, Graph};
use serde_json::Value;

use super::BuildMode;

const NODE_CATALOG: &str = r#"Common node types:
- n8n-nodes-base.webhook (HTTP webhooks)
- n8n-nodes-base.scheduleTrigger (cron schedule)
- n8n-nodes-base.httpRequest (make HTTP requests)
- n8n-nodes-base.set (set/transform data)
- n8n-nodes-base.if (conditional logic)
- n8n-nodes-base.code (custom JavaScript)
- n8n-nodes-base.slack (Slack integration)
- n8n-nodes-base.gmail (Gmail integration)
- n8n-nodes-base.telegram (Telegram integration)
- n8n-nodes-base.googleSheets (Google Sheets)
- n8n-nodes-base.respondToWebhook (respond to webhook)"#;

/// System prompt for the main graph-building call.
pub(crate) fn workflow_system_prompt(mode: BuildMode) -> String {
    let mode_rules = match mode {
        BuildMode::Interpret => {
            "Interpret the request: fill in sensible parameters, add the nodes a working \
             workflow needs even if the user did not name them."
        }
        BuildMode::Exact => {
            "Follow the request exactly: create only the nodes the user asked for, in the \
             order given, and do not invent parameter values the user did not provide."
        }
    };

    format!(
        r#"You are an expert n8n workflow architect. Turn the user's request into a workflow.

{mode_rules}

Guidelines:
- Keep workflows simple and focused (at most 8 nodes)
- Use only common, well-supported node types
- Every node needs a unique id, a clear name and a type
- Prefer linear data flow; list nodes in execution order

Respond ONLY with valid JSON in this exact format:
{{
  "workflow_name": "descriptive name",
  "description": "what this workflow does",
  "nodes": [
    {{
      "id": "unique_descriptive_id",
      "name": "Clear Node Name",
      "type": "n8n-nodes-base.nodetype",
      "parameters": {{"key": "value"}}
    }}
  ],
  "connections": [
    {{"source": "source_node_id", "target": "target_node_id"}}
  ],
  "tags": ["tag1", "tag2"]
}}

{NODE_CATALOG}"#
    )
}

/// System prompt for the optional enhancement call.
pub(crate) fn enhancement_system_prompt(mode: BuildMode) -> String {
    format!(
        r#"You are a workflow enhancement assistant. Rewrite the user's workflow request so it is
clear and complete enough to build from.

Mode: {mode}
- "interpret": be creative and add helpful details
- "exact": follow the user's instructions precisely, minimal interpretation

Respond with JSON:
{{
  "enhanced_prompt": "improved and detailed prompt",
  "suggested_sequence": ["node1", "node2"],
  "estimated_complexity": "simple|medium|complex",
  "recommendations": "helpful suggestions"
}}"#
    )
}

pub(crate) fn fix_system_prompt() -> &'static str {
    "You are an n8n workflow debugging expert. You propose minimal parameter fixes."
}

/// User message asking the oracle to fix detected defects.
pub(crate) fn fix_request(graph: &Graph, defects: &[Defect]) -> String {
    let broken: Vec<Value> = graph
        .nodes
        .iter()
        .filter(|n| defects.iter().any(|d| d.node_id == n.id))
        .filter_map(|n| serde_json::to_value(n).ok())
        .collect();
    let defect_list: Vec<Value> = defects
        .iter()
        .map(|d| {
            serde_json::json!({
                "node_id": d.node_id,
                "node_name": d.node_name,
                "error": d.kind.code(),
                "parameter": d.field,
                "message": d.kind.message(),
            })
        })
        .collect();

    format!(
        r#"You are fixing errors in an n8n workflow.

WORKFLOW: {name}

DETECTED ERRORS:
{errors}

NODES WITH ERRORS:
{nodes}

Provide fixes in JSON:
{{
  "fixes": [
    {{"node_id": "node_id", "parameter": "parameter_name", "new_value": "correct_value", "reason": "why this fixes the error"}}
  ]
}}

Common fixes:
- httpRequest: add "responseFormat": "json" or "string"
- httpRequest: ensure a valid URL
- respondToWebhook: add proper responseData
- code/function: ensure the code returns data"#,
        name = graph.name,
        errors = serde_json::to_string_pretty(&defect_list).unwrap_or_default(),
        nodes = serde_json::to_string_pretty(&broken).unwrap_or_default(),
    )
}

pub(crate) fn connector_system_prompt() -> &'static str {
    r#"You are an n8n workflow architect. Decide how the nodes of the workflow should be connected.

Think about where data comes from and where it goes, and which order makes sense.

Respond with JSON:
{
  "reasoning": "the intended data flow",
  "connections": [
    {"from": "source_node_id", "to": "target_node_id", "reason": "why this connection makes sense"}
  ],
  "warnings": ["any potential issues"]
}

Use node ids exactly as listed. Only list connections that are missing."#
}

/// User message describing the graph to wire up.
pub(crate) fn connection_request(graph: &Graph) -> String {
    let mut summary = graph_summary(graph);
    if graph.connections.is_empty() {
        summary.push_str("\n  None - needs connections!");
    }
    format!("WORKFLOW TO ANALYZE:\n{}", summary)
}

/// System prompt for chat-driven modification of an existing graph.
pub(crate) fn modification_system_prompt(graph: &Graph) -> String {
    let full = serde_json::to_string_pretty(graph).unwrap_or_default();
    format!(
        r#"You are an n8n workflow modification expert.

CURRENT WORKFLOW SUMMARY:
{summary}

FULL WORKFLOW DATA:
{full}

Analyze the user's modification request and respond with executable changes in JSON:
{{
  "changes": [
    {{"operation": "update_node_parameter", "node_id": "schedule1", "parameter_path": "cronExpression", "new_value": "*/30 * * * *", "reason": "..."}},
    {{"operation": "update_schedule", "node_id": "schedule1", "new_value": "0 8 * * 1"}},
    {{"operation": "add_node", "node_config": {{"name": "Notify", "type": "n8n-nodes-base.slack", "parameters": {{}}}}}},
    {{"operation": "remove_node", "node_id": "old_node"}},
    {{"operation": "change_connection", "source_node": "a", "target_node": "b"}},
    {{"operation": "remove_connection", "source_node": "b", "target_node": "c"}}
  ],
  "summary": "what changes and why",
  "validation": {{"safe": true, "breaking_changes": false}}
}}

Be specific with node ids, parameter paths and exact values.
Set "safe" to false when the change could break the workflow."#,
        summary = graph_summary(graph),
    )
}

/// Human-readable summary: one line per node with its key parameters, then
/// the connection list.
pub(crate) fn graph_summary(graph: &Graph) -> String {
    let mut lines = vec![
        format!("Workflow: {}", graph.name),
        format!("Total Nodes: {}", graph.nodes.len()),
        format!("Status: {}", if graph.active { "Active" } else { "Inactive" }),
        String::new(),
        "NODES:".to_string(),
    ];

    for (i, node) in graph.nodes.iter().enumerate() {
        let kind = node.kind.trim_start_matches("n8n-nodes-base.");
        let mut key_params = Vec::new();
        for key in ["cronExpression", "url", "method", "chatId"] {
            if let Some(value) = node.parameters.get(key) {
                let text = match value {
                    Value::String(s) => super::parse::truncate_chars(s, 50),
                    other => other.to_string(),
                };
                key_params.push(format!("{}='{}'", key, text));
            }
        }
        let params = if key_params.is_empty() {
            "no params".to_string()
        } else {
            key_params.join(", ")
        };
        lines.push(format!(
            "{}. [{}] {} ({}): {}",
            i + 1,
            node.id,
            node.name,
            kind,
            params
        ));
    }

    lines.push(String::new());
    lines.push("CONNECTIONS:".to_string());
    for (source, target) in graph.connections.edges() {
        lines.push(format!("  {} -> {}", source, target.node));
    }
    lines.join("\n")
}

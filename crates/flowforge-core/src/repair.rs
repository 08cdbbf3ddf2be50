use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::edit::set_parameter;
use crate::sanitize::{DEFAULT_CODE, PLACEHOLDER_URL, is_blank};
use crate::taxonomy::{self, KindFamily};
use crate::{Graph, Node};

/// Code bodies shorter than this (after trimming) count as empty.
pub const MIN_CODE_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectKind {
    MissingUrl,
    MissingResponseFormat,
    MissingResponseData,
    #[serde(rename = "empty_function")]
    EmptyCode,
}

impl DefectKind {
    pub fn code(&self) -> &'static str {
        match self {
            DefectKind::MissingUrl => "missing_url",
            DefectKind::MissingResponseFormat => "missing_response_format",
            DefectKind::MissingResponseData => "missing_response_data",
            DefectKind::EmptyCode => "empty_function",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            DefectKind::MissingUrl => "HTTP request has no URL",
            DefectKind::MissingResponseFormat => "HTTP request does not set a response format",
            DefectKind::MissingResponseData => "Webhook response has no data configuration",
            DefectKind::EmptyCode => "Code node has little or no code",
        }
    }
}

impl fmt::Display for DefectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defect {
    pub node_id: String,
    pub node_name: String,
    pub kind: DefectKind,
    /// Parameter that must change to clear the defect.
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairAction {
    pub node_id: String,
    /// Dotted parameter path.
    pub field: String,
    pub proposed_value: Value,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairPlan {
    pub actions: Vec<RepairAction>,
}

impl RepairPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Scan every node for kind-specific structural defects.
pub fn detect_defects(graph: &Graph) -> Vec<Defect> {
    let mut defects = Vec::new();
    for node in &graph.nodes {
        for (kind, field) in node_defects(node) {
            defects.push(Defect {
                node_id: node.id.clone(),
                node_name: node.name.clone(),
                kind,
                field: field.to_string(),
            });
        }
    }
    if !defects.is_empty() {
        tracing::info!(count = defects.len(), "Detected workflow defects");
    }
    defects
}

fn node_defects(node: &Node) -> Vec<(DefectKind, &'static str)> {
    let params = &node.parameters;
    let mut found = Vec::new();
    match taxonomy::family(&node.kind) {
        Some(KindFamily::HttpCall) => {
            if is_blank(params.get("url")) {
                found.push((DefectKind::MissingUrl, "url"));
            }
            if is_blank(params.get("responseFormat")) {
                found.push((DefectKind::MissingResponseFormat, "responseFormat"));
            }
        }
        Some(KindFamily::Respond) => {
            if is_blank(params.get("responseData")) {
                found.push((DefectKind::MissingResponseData, "responseData"));
            }
        }
        Some(KindFamily::Code) => {
            let field = taxonomy::code_field(&node.kind);
            let len = params
                .get(field)
                .and_then(Value::as_str)
                .map(|code| code.trim().chars().count())
                .unwrap_or(0);
            if len < MIN_CODE_LEN {
                found.push((DefectKind::EmptyCode, field));
            }
        }
        Some(KindFamily::Schedule) | Some(KindFamily::Conditional) | None => {}
    }
    found
}

/// Rule-table value that clears `kind`.
pub fn rule_value(kind: DefectKind) -> Value {
    match kind {
        DefectKind::MissingUrl => Value::from(PLACEHOLDER_URL),
        DefectKind::MissingResponseFormat => Value::from("json"),
        DefectKind::MissingResponseData => Value::from("firstEntryJson"),
        DefectKind::EmptyCode => Value::from(DEFAULT_CODE),
    }
}

/// Plan one action per defect from the fixed rule table.
pub fn plan_repairs(defects: &[Defect]) -> RepairPlan {
    RepairPlan {
        actions: defects.iter().map(rule_action).collect(),
    }
}

pub fn rule_action(defect: &Defect) -> RepairAction {
    RepairAction {
        node_id: defect.node_id.clone(),
        field: defect.field.clone(),
        proposed_value: rule_value(defect.kind),
        reason: format!("{} ({})", defect.kind.message(), defect.kind.code()),
    }
}

/// Whether setting `value` on the defect's field would clear it.
pub fn clears_defect(defect: &Defect, value: &Value) -> bool {
    match defect.kind {
        DefectKind::MissingUrl => value
            .as_str()
            .map(|url| {
                let url = url.trim();
                url.starts_with("http://") || url.starts_with("https://") || url.starts_with("=")
            })
            .unwrap_or(false),
        DefectKind::MissingResponseFormat | DefectKind::MissingResponseData => {
            !is_blank(Some(value))
        }
        DefectKind::EmptyCode => value
            .as_str()
            .map(|code| code.trim().chars().count() >= MIN_CODE_LEN)
            .unwrap_or(false),
    }
}

/// Return a copy of `graph` with every action applied. Unknown node ids and
/// unusable paths are skipped. Applying the same plan twice is a no-op.
pub fn apply_repairs(graph: &Graph, plan: &RepairPlan) -> Graph {
    let mut repaired = graph.clone();
    for action in &plan.actions {
        let Some(node) = repaired.find_node_mut(&action.node_id) else {
            tracing::warn!(node_id = %action.node_id, "Repair targets unknown node, skipping");
            continue;
        };
        if let Err(e) = set_parameter(
            &mut node.parameters,
            &action.field,
            action.proposed_value.clone(),
        ) {
            tracing::warn!(node_id = %action.node_id, "Repair skipped: {}", e);
        }
    }
    repaired
}

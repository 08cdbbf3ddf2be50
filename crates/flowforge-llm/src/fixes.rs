//! Repair planning with the oracle in the loop.
//!
//! The oracle proposes parameter fixes for detected defects. A fix is only
//! accepted when it names a detected defect and its value actually clears
//! it; every defect left over gets the rule-table action.

use std::time::Duration;

use flowforge_core::repair::{clears_defect, rule_action};
use flowforge_core::{Defect, Graph, RepairAction, RepairPlan};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::builder::{ask_oracle, first_json_object, fix_request, fix_system_prompt, parse_lenient};
use crate::{ChatBackend, Message};

pub const FIX_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairProposal {
    pub plan: RepairPlan,
    /// How many actions in the plan came from the oracle.
    pub oracle_actions: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OracleFix {
    node_id: String,
    parameter: String,
    new_value: Value,
    #[serde(default)]
    reason: Option<String>,
}

/// Plan repairs for `defects`, preferring oracle-proposed values. Never fails:
/// any oracle problem degrades to the rule table with a warning.
pub async fn plan_repairs_with_backend(
    backend: &impl ChatBackend,
    graph: &Graph,
    defects: &[Defect],
) -> RepairProposal {
    let mut proposal = RepairProposal::default();
    if defects.is_empty() {
        return proposal;
    }

    let messages = vec![
        Message::system(fix_system_prompt()),
        Message::user(fix_request(graph, defects)),
    ];

    let fixes = match ask_oracle(backend, "Fixer", messages, FIX_TIMEOUT).await {
        Ok(content) => match first_json_object(&content) {
            Ok(value) => {
                let raw = value
                    .get("fixes")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let (fixes, warnings) = parse_lenient::<OracleFix>(&raw);
                proposal.warnings.extend(warnings);
                fixes
            }
            Err(reason) => {
                proposal
                    .warnings
                    .push(format!("Oracle fixes unparsable, using rules: {}", reason));
                Vec::new()
            }
        },
        Err(e) => {
            proposal
                .warnings
                .push(format!("Oracle fixes unavailable, using rules: {}", e));
            Vec::new()
        }
    };

    let mut resolved = vec![false; defects.len()];
    for fix in fixes {
        let matching = defects.iter().enumerate().find(|(i, d)| {
            !resolved[*i] && d.node_id == fix.node_id && d.field == fix.parameter.trim()
        });
        let Some((index, defect)) = matching else {
            proposal.warnings.push(format!(
                "Ignored oracle fix for {}.{}: no matching defect",
                fix.node_id, fix.parameter
            ));
            continue;
        };
        if !clears_defect(defect, &fix.new_value) {
            proposal.warnings.push(format!(
                "Ignored oracle fix for {}.{}: value does not clear {}",
                fix.node_id, fix.parameter, defect.kind
            ));
            continue;
        }
        resolved[index] = true;
        proposal.plan.actions.push(RepairAction {
            node_id: defect.node_id.clone(),
            field: defect.field.clone(),
            proposed_value: fix.new_value,
            reason: fix
                .reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| defect.kind.message().to_string()),
        });
        proposal.oracle_actions += 1;
    }

    for (defect, _) in defects.iter().zip(&resolved).filter(|(_, done)| !**done) {
        proposal.plan.actions.push(rule_action(defect));
    }

    if !proposal.warnings.is_empty() {
        warn!(count = proposal.warnings.len(), "Repair planning warnings");
    }
    info!(
        actions = proposal.plan.actions.len(),
        oracle = proposal.oracle_actions,
        "Planned repairs"
    );

    proposal
}

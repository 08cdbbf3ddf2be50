use std::time::Duration;

use flowforge_core::{Graph, GraphEdit};
use serde_json::Value;
use tracing::info;

use crate::builder::{ask_oracle, first_json_object, modification_system_prompt, parse_lenient, unparsable};
use crate::{BuildError, ChatBackend, Message};

pub const MODIFY_TIMEOUT: Duration = Duration::from_secs(45);

/// Edits the oracle proposes for a natural-language change request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModificationPlan {
    pub changes: Vec<GraphEdit>,
    pub summary: Option<String>,
    /// The oracle's own safety verdict. Absent means safe.
    pub safe: bool,
    pub warnings: Vec<String>,
}

/// Ask the oracle how to apply `request` to `graph`. Nothing is applied here.
pub async fn plan_modification_with_backend(
    backend: &impl ChatBackend,
    graph: &Graph,
    request: &str,
) -> Result<ModificationPlan, BuildError> {
    let messages = vec![
        Message::system(modification_system_prompt(graph)),
        Message::user(request),
    ];
    let content = ask_oracle(backend, "Modifier", messages, MODIFY_TIMEOUT).await?;
    let value = first_json_object(&content).map_err(|reason| unparsable(&content, reason))?;

    let raw_changes = match value.get("changes") {
        Some(Value::Array(items)) => items.clone(),
        None | Some(Value::Null) => Vec::new(),
        Some(other) => {
            return Err(unparsable(
                &content,
                format!("'changes' must be an array, got {}", other),
            ));
        }
    };
    let (changes, warnings) = parse_lenient::<GraphEdit>(&raw_changes);

    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .map(str::to_string);
    let safe = value
        .pointer("/validation/safe")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    info!(
        changes = changes.len(),
        skipped = warnings.len(),
        safe,
        "Planned workflow modification"
    );

    Ok(ModificationPlan {
        changes,
        summary,
        safe,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChatResponse, Choice};
    use flowforge_core::{Node, Position, apply_edits};
    use serde_json::json;
    use std::sync::Mutex;

    struct OneShot {
        reply: String,
        seen: Mutex<Vec<Message>>,
    }

    impl OneShot {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl ChatBackend for OneShot {
        fn model_name(&self) -> &str {
            "one-shot"
        }

        async fn chat(
            &self,
            messages: Vec<Message>,
        ) -> anyhow::Result<ChatResponse> {
            *self.seen.lock().unwrap() = messages;
            Ok(ChatResponse {
                id: String::new(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(self.reply.as_str()),
                    finish_reason: None,
                }],
                usage: None,
            })
        }
    }

    fn scheduled_graph() -> Graph {
        let mut graph = Graph::new("nightly");
        let schedule = Node::new(
            "sched",
            "Nightly",
            "n8n-nodes-base.scheduleTrigger",
            Position::grid(0),
        )
        .with_parameters(json!({"cronExpression": "0 9 * * *"}).as_object().cloned().unwrap());
        graph.insert_node(schedule).unwrap();
        graph
            .insert_node(Node::new("mail", "Mail", "n8n-nodes-base.emailSend", Position::grid(1)))
            .unwrap();
        graph.connect("sched", "mail");
        graph
    }

    #[tokio::test]
    async fn plans_and_applies_changes() {
        let backend = OneShot::new(
            r#"```json
            {"changes": [
                {"operation": "update_schedule", "node_id": "sched", "new_value": "*/30 * * * *"},
                {"operation": "teleport", "node_id": "sched"},
                {"operation": "add_node", "node_config": {"id": "log", "name": "Log", "type": "n8n-nodes-base.code"}},
                {"operation": "change_connection", "source_node": "mail", "target_node": "log"}
            ],
            "summary": "Run every half hour and log"}
            ```"#,
        );
        let mut graph = scheduled_graph();
        let plan = plan_modification_with_backend(&backend, &graph, "every 30 minutes please")
            .await
            .unwrap();

        assert!(plan.safe);
        assert_eq!(plan.changes.len(), 3);
        assert_eq!(plan.warnings.len(), 1);
        assert_eq!(plan.summary.as_deref(), Some("Run every half hour and log"));

        let seen = backend.seen.lock().unwrap().clone();
        assert!(seen[0].content.as_deref().unwrap().contains("\"sched\""));

        let skipped = apply_edits(&mut graph, &plan.changes);
        assert!(skipped.is_empty());
        assert_eq!(
            graph.find_node("sched").unwrap().parameters["cronExpression"],
            "*/30 * * * *"
        );
        assert!(graph.connections.contains("mail", "log"));
    }

    #[tokio::test]
    async fn reports_unsafe_verdict() {
        let backend = OneShot::new(
            r#"{"changes": [{"operation": "remove_node", "node_id": "sched"}],
                "validation": {"safe": false, "breaking_changes": true}}"#,
        );
        let plan = plan_modification_with_backend(&backend, &scheduled_graph(), "drop the trigger")
            .await
            .unwrap();
        assert!(!plan.safe);
        assert_eq!(
            plan.changes,
            vec![GraphEdit::RemoveNode {
                node_id: "sched".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn rejects_reply_without_json() {
        let backend = OneShot::new("Sure, I changed it.");
        let err = plan_modification_with_backend(&backend, &scheduled_graph(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::OracleResponseUnparsable { .. }));
    }

    #[tokio::test]
    async fn rejects_non_array_changes() {
        let backend = OneShot::new(r#"{"changes": "everything"}"#);
        let err = plan_modification_with_backend(&backend, &scheduled_graph(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::OracleResponseUnparsable { .. }));
    }
}

use super::parse::{extract_json, first_json_object, truncate_intent};
use super::*;
use crate::cache::{DEFAULT_TTL, ResponseCache};
use crate::{ChatBackend, ChatResponse, Choice, Message};
use flowforge_core::{DefectKind, EdgeReason, InferencePolicy};
use std::sync::Mutex;
use std::time::Duration;

// ── Test helpers ────────────────────────────────────────────────

/// Mock backend that returns a sequence of responses.
struct MockBackend {
    responses: Mutex<Vec<String>>,
    calls: Mutex<Vec<Vec<Message>>>,
    delay: Option<Duration>,
}

impl MockBackend {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    fn single(response: &str) -> Self {
        Self::new(vec![response])
    }

    fn slow(response: &str, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::single(response)
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn last_call(&self) -> Vec<Message> {
        self.calls.lock().unwrap().last().cloned().unwrap()
    }
}

impl ChatBackend for MockBackend {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
    ) -> anyhow::Result<ChatResponse> {
        self.calls.lock().unwrap().push(messages);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let text = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                anyhow::bail!("no scripted response left");
            }
            responses.remove(0)
        };
        Ok(ChatResponse {
            id: "mock".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(&text),
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        })
    }
}

const SCENARIO: &str = r#"{
    "workflow_name": "Daily status",
    "description": "Polls an API and posts the result",
    "nodes": [
        {"id": "t1", "name": "Every morning", "type": "trigger.schedule"},
        {"id": "p1", "name": "Fetch status", "type": "processor.http", "parameters": {}},
        {"id": "s1", "name": "Post message", "type": "sink.message"}
    ],
    "connections": [],
    "tags": ["ops", 3, {"name": "daily"}]
}"#;

fn edge_list(graph: &Graph) -> Vec<(String, String)> {
    graph
        .connections
        .edges()
        .map(|(s, t)| (s.to_string(), t.node.clone()))
        .collect()
}

fn pair(a: &str, b: &str) -> (String, String) {
    (a.to_string(), b.to_string())
}

// ── Parsing ─────────────────────────────────────────────────────

#[test]
fn test_extract_json_plain() {
    let input = r#"{"nodes": []}"#;
    assert_eq!(extract_json(input), input);
}

#[test]
fn test_extract_json_code_fence() {
    let input = "```json\n{\"nodes\": []}\n```";
    assert_eq!(extract_json(input), r#"{"nodes": []}"#);
}

#[test]
fn test_fence_forms_parse_identically() {
    let body = r#"{"workflow_name": "W", "nodes": [{"id": "a", "name": "A", "type": "x.y"}]}"#;
    let tagged = format!("Here you go:\n```json\n{}\n```\nEnjoy.", body);
    let untagged = format!("```\n{}\n```", body);
    let bare = format!("Sure, the workflow follows.\n{}", body);

    let a = first_json_object(&tagged).unwrap();
    let b = first_json_object(&untagged).unwrap();
    let c = first_json_object(&bare).unwrap();
    assert_eq!(a, b);
    assert_eq!(b, c);

    let parsed = parse_oracle_response(&bare).unwrap();
    assert_eq!(parsed.workflow_name.as_deref(), Some("W"));
    assert_eq!(parsed.nodes.len(), 1);
    assert!(parsed.connections.is_empty());
}

#[test]
fn test_parse_skips_stray_braces_before_object() {
    let text = r#"Use {curly} placeholders. {"nodes": [], "connections": null}"#;
    let parsed = parse_oracle_response(text).unwrap();
    assert!(parsed.nodes.is_empty());
    assert!(parsed.connections.is_empty());
}

#[test]
fn test_parse_without_json_is_unparsable() {
    let err = parse_oracle_response("I cannot build that workflow, sorry.").unwrap_err();
    match err {
        BuildError::OracleResponseUnparsable { raw, .. } => {
            assert!(raw.starts_with("I cannot"));
        }
        other => panic!("Expected OracleResponseUnparsable, got {:?}", other),
    }
}

#[test]
fn test_parse_object_without_nodes_is_unparsable() {
    let err = parse_oracle_response(r#"{"workflow_name": "W"}"#).unwrap_err();
    assert!(matches!(err, BuildError::OracleResponseUnparsable { .. }));
}

#[test]
fn test_parse_skips_inline_examples_in_prose() {
    let text = r#"Each node looks like {"id": "x"}. Here is the workflow: {"workflow_name": "Digest", "nodes": [{"id": "t1", "name": "Start", "type": "n8n-nodes-base.manualTrigger"}]} Let me know if it needs changes."#;
    let parsed = parse_oracle_response(text).unwrap();
    assert_eq!(parsed.workflow_name.as_deref(), Some("Digest"));
    assert_eq!(parsed.nodes.len(), 1);
}

#[test]
fn test_parse_reports_shape_error_when_no_object_is_a_workflow() {
    let err = parse_oracle_response(r#"Try {"id": "x"} or {"name": "y"}."#).unwrap_err();
    match err {
        BuildError::OracleResponseUnparsable { reason, .. } => {
            assert!(reason.contains("nodes"), "reason: {}", reason);
        }
        other => panic!("Expected OracleResponseUnparsable, got {:?}", other),
    }
}

#[test]
fn test_unparsable_raw_is_truncated() {
    let long = "x".repeat(2000);
    let BuildError::OracleResponseUnparsable { raw, .. } =
        parse_oracle_response(&long).unwrap_err()
    else {
        panic!("Expected OracleResponseUnparsable");
    };
    assert!(raw.chars().count() <= 503);
}

#[test]
fn test_truncate_intent_respects_char_boundaries() {
    assert_eq!(truncate_intent("  short  "), "short");
    let long = "é".repeat(40);
    let truncated = truncate_intent(&long);
    assert!(truncated.ends_with("..."));
    assert!(truncated.len() <= 50);
}

// ── Construction ────────────────────────────────────────────────

#[test]
fn test_construct_scenario_graph() {
    let workflow = parse_oracle_response(SCENARIO).unwrap();
    let (graph, audit) = construct_graph(workflow, "prompt", &BuildOptions::default()).unwrap();

    assert_eq!(graph.name, "Daily status");
    assert_eq!(graph.tags, vec!["ops".to_string(), "daily".to_string()]);
    assert_eq!(edge_list(&graph), vec![pair("t1", "p1"), pair("p1", "s1")]);
    assert!(flowforge_core::analyze(&graph).unconnected_node_ids.is_empty());

    let reasons: Vec<_> = audit.inferred_edges.iter().map(|e| e.reason).collect();
    assert_eq!(
        reasons,
        vec![EdgeReason::TriggerToProcessor, EdgeReason::ProcessorToSink]
    );

    let http = graph.find_node("p1").unwrap();
    assert_eq!(http.parameters["method"], "GET");
    assert_eq!(http.parameters["responseFormat"], "json");
    assert!(
        audit
            .injected_defaults
            .iter()
            .any(|d| d.node_id == "p1" && d.field == "url")
    );
    assert_eq!(audit.repairs.len(), 1);
    assert_eq!(audit.repairs[0].field, "responseFormat");
}

#[test]
fn test_construct_without_auto_repair_leaves_defects() {
    let workflow = parse_oracle_response(SCENARIO).unwrap();
    let options = BuildOptions {
        auto_repair: false,
        ..BuildOptions::default()
    };
    let (graph, audit) = construct_graph(workflow, "prompt", &options).unwrap();
    assert!(audit.repairs.is_empty());
    let defects = flowforge_core::detect_defects(&graph);
    assert_eq!(defects.len(), 1);
    assert_eq!(defects[0].kind, DefectKind::MissingResponseFormat);
}

#[test]
fn test_construct_names_from_prompt_when_missing() {
    let text = r#"{"nodes": [{"id": "a", "name": "A", "type": "x.y"}]}"#;
    let workflow = parse_oracle_response(text).unwrap();
    let (graph, _) =
        construct_graph(workflow, "Send me the weather every day", &BuildOptions::default())
            .unwrap();
    assert_eq!(graph.name, "Send me the weather every day");
}

#[test]
fn test_construct_resolves_connections_by_name() {
    let text = r#"{"nodes": [
        {"id": "t1", "name": "Hook", "type": "n8n-nodes-base.webhook"},
        {"id": "p1", "name": "Transform", "type": "n8n-nodes-base.set"}
    ], "connections": [{"source": "Hook", "target": "p1"}]}"#;
    let workflow = parse_oracle_response(text).unwrap();
    let (graph, audit) = construct_graph(workflow, "p", &BuildOptions::default()).unwrap();
    assert_eq!(edge_list(&graph), vec![pair("t1", "p1")]);
    assert!(audit.inferred_edges.is_empty());
}

#[test]
fn test_construct_malformed_node_skip_and_reject() {
    let text = r#"{"nodes": [
        {"id": "t1", "name": "Hook", "type": "n8n-nodes-base.webhook"},
        {"id": "bad", "name": "No type"},
        {"id": "s1", "name": "Reply", "type": "n8n-nodes-base.respondToWebhook",
         "parameters": {"responseData": "allEntries"}}
    ], "connections": [
        {"source": "t1", "target": "bad"},
        {"source": "t1", "target": "s1"}
    ]}"#;

    let workflow = parse_oracle_response(text).unwrap();
    let (graph, audit) = construct_graph(workflow, "p", &BuildOptions::default()).unwrap();
    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(edge_list(&graph), vec![pair("t1", "s1")]);
    assert!(audit.warnings.iter().any(|w| w.contains("Node skipped")));
    assert!(audit.warnings.iter().any(|w| w.contains("'bad' was skipped")));

    let workflow = parse_oracle_response(text).unwrap();
    let options = BuildOptions {
        malformed_nodes: MalformedNodePolicy::Reject,
        ..BuildOptions::default()
    };
    let err = construct_graph(workflow, "p", &options).unwrap_err();
    assert!(matches!(err, BuildError::MalformedNode(_)));
}

#[test]
fn test_construct_rejects_unknown_endpoint() {
    let text = r#"{"nodes": [
        {"id": "t1", "name": "Hook", "type": "n8n-nodes-base.webhook"}
    ], "connections": [{"source": "t1", "target": "ghost"}]}"#;
    let workflow = parse_oracle_response(text).unwrap();
    let err = construct_graph(workflow, "p", &BuildOptions::default()).unwrap_err();
    assert_eq!(
        err,
        BuildError::InvalidGraph(flowforge_core::ValidationError::DanglingConnection {
            from: "t1".to_string(),
            to: "ghost".to_string(),
        })
    );
}

#[test]
fn test_construct_duplicate_ids() {
    let text = r#"{"nodes": [
        {"id": "a", "name": "First", "type": "n8n-nodes-base.webhook"},
        {"id": "a", "name": "Second", "type": "n8n-nodes-base.set"}
    ]}"#;
    let workflow = parse_oracle_response(text).unwrap();
    let (graph, audit) = construct_graph(workflow, "p", &BuildOptions::default()).unwrap();
    assert_eq!(graph.nodes.len(), 1);
    assert_eq!(graph.nodes[0].name, "First");
    assert!(audit.warnings.iter().any(|w| w.contains("duplicate id")));

    let workflow = parse_oracle_response(text).unwrap();
    let options = BuildOptions {
        malformed_nodes: MalformedNodePolicy::Reject,
        ..BuildOptions::default()
    };
    let err = construct_graph(workflow, "p", &options).unwrap_err();
    assert!(matches!(err, BuildError::InvalidGraph(_)));
}

#[test]
fn test_construct_all_nodes_skipped_is_invalid() {
    let text = r#"{"nodes": [{"name": "No id"}]}"#;
    let workflow = parse_oracle_response(text).unwrap();
    let err = construct_graph(workflow, "p", &BuildOptions::default()).unwrap_err();
    assert_eq!(
        err,
        BuildError::InvalidGraph(flowforge_core::ValidationError::NoNodes)
    );
}

#[test]
fn test_construct_strict_policy_reports_orphans() {
    let text = r#"{"nodes": [
        {"id": "w1", "name": "Hook", "type": "n8n-nodes-base.webhook"},
        {"id": "s1", "name": "Slack", "type": "n8n-nodes-base.slack"},
        {"id": "s2", "name": "Mail", "type": "n8n-nodes-base.emailSend"}
    ], "connections": [{"source": "w1", "target": "s1"}]}"#;

    let workflow = parse_oracle_response(text).unwrap();
    let (graph, audit) = construct_graph(workflow, "p", &BuildOptions::default()).unwrap();
    assert!(graph.connections.has_inbound("s2"));
    assert_eq!(
        audit.inferred_edges.last().map(|e| e.reason),
        Some(EdgeReason::OrphanSweep)
    );

    let workflow = parse_oracle_response(text).unwrap();
    let options = BuildOptions {
        inference: InferencePolicy::strict(),
        ..BuildOptions::default()
    };
    let err = construct_graph(workflow, "p", &options).unwrap_err();
    assert_eq!(err, BuildError::OrphanNodes(vec!["s2".to_string()]));
}

#[test]
fn test_construct_relayout_orders_by_depth() {
    let workflow = parse_oracle_response(SCENARIO).unwrap();
    let options = BuildOptions {
        relayout: true,
        ..BuildOptions::default()
    };
    let (graph, _) = construct_graph(workflow, "p", &options).unwrap();
    let x = |id: &str| graph.find_node(id).unwrap().position.x;
    assert!(x("t1") < x("p1"));
    assert!(x("p1") < x("s1"));
}

// ── Builder ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_build_with_backend() {
    let mock = MockBackend::single(&format!("```json\n{}\n```", SCENARIO));
    let output = build_graph_with_backend(&mock, "status report", &BuildOptions::default())
        .await
        .unwrap();
    assert_eq!(output.graph.nodes.len(), 3);
    assert_eq!(
        output.description.as_deref(),
        Some("Polls an API and posts the result")
    );
    assert!(!output.cached);
    assert_eq!(mock.call_count(), 1);

    let call = mock.last_call();
    assert_eq!(call[0].role, "system");
    assert_eq!(call[1].content.as_deref(), Some("status report"));
}

#[tokio::test]
async fn test_build_unparsable_without_repair_attempts() {
    let mock = MockBackend::new(vec!["no json here", SCENARIO]);
    let err = build_graph_with_backend(&mock, "p", &BuildOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::OracleResponseUnparsable { .. }));
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn test_build_repair_attempt_feeds_back_error() {
    let mock = MockBackend::new(vec!["no json here", SCENARIO]);
    let options = BuildOptions {
        repair_attempts: 1,
        ..BuildOptions::default()
    };
    let output = build_graph_with_backend(&mock, "p", &options).await.unwrap();
    assert_eq!(output.graph.nodes.len(), 3);
    assert_eq!(mock.call_count(), 2);

    let retry = mock.last_call();
    let feedback = retry.last().unwrap().content.as_deref().unwrap();
    assert!(feedback.contains("previous output had an error"));
    assert_eq!(retry[retry.len() - 2].role, "assistant");
}

#[tokio::test]
async fn test_build_backend_failure_is_unreachable() {
    let mock = MockBackend::new(vec![]);
    let options = BuildOptions {
        repair_attempts: 2,
        ..BuildOptions::default()
    };
    let err = build_graph_with_backend(&mock, "p", &options)
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::OracleUnreachable { .. }));
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn test_build_timeout_is_unreachable() {
    let mock = MockBackend::slow(SCENARIO, Duration::from_millis(500));
    let options = BuildOptions {
        oracle_timeout: Some(Duration::from_millis(20)),
        ..BuildOptions::default()
    };
    let err = build_graph_with_backend(&mock, "p", &options)
        .await
        .unwrap_err();
    match err {
        BuildError::OracleUnreachable { reason } => assert!(reason.contains("timed out")),
        other => panic!("Expected OracleUnreachable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_build_uses_response_cache() {
    let mock = MockBackend::single(SCENARIO);
    let cache = ResponseCache::new(DEFAULT_TTL);
    let builder = GraphBuilder::new(&mock, BuildOptions::default()).with_cache(&cache);

    let first = builder.build("status report").await.unwrap();
    assert!(!first.cached);
    let second = builder.build("  status report ").await.unwrap();
    assert!(second.cached);
    assert_eq!(first.graph.nodes, second.graph.nodes);
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn test_build_cache_is_keyed_by_mode() {
    let mock = MockBackend::new(vec![SCENARIO, SCENARIO]);
    let cache = ResponseCache::new(DEFAULT_TTL);

    GraphBuilder::new(&mock, BuildOptions::default())
        .with_cache(&cache)
        .build("p")
        .await
        .unwrap();
    let exact = BuildOptions {
        mode: BuildMode::Exact,
        ..BuildOptions::default()
    };
    let output = GraphBuilder::new(&mock, exact)
        .with_cache(&cache)
        .build("p")
        .await
        .unwrap();
    assert!(!output.cached);
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test]
async fn test_build_with_enhancement() {
    let enhancer = MockBackend::single(
        r#"{"enhanced_prompt": "Every morning fetch status and post it", "estimated_complexity": "simple"}"#,
    );
    let mock = MockBackend::single(SCENARIO);
    let options = BuildOptions {
        enhance: true,
        ..BuildOptions::default()
    };
    let output = GraphBuilder::new(&mock, options)
        .with_enhancer(&enhancer)
        .build("status")
        .await
        .unwrap();
    assert_eq!(output.complexity, Complexity::Simple);
    assert_eq!(
        mock.last_call()[1].content.as_deref(),
        Some("Every morning fetch status and post it")
    );
    assert_eq!(enhancer.call_count(), 1);
}

#[tokio::test]
async fn test_enhancement_falls_back_on_garbage() {
    let mock = MockBackend::single("I would rather not.");
    let enhancement = enhance_prompt(&mock, "status", BuildMode::Interpret)
        .await
        .unwrap();
    assert_eq!(enhancement.prompt, "status");
    assert_eq!(enhancement.complexity, Complexity::Medium);
    assert!(enhancement.warning.is_some());
}

#[tokio::test]
async fn test_enhancement_warning_lands_in_audit() {
    let mock = MockBackend::new(vec!["not json", SCENARIO]);
    let options = BuildOptions {
        enhance: true,
        ..BuildOptions::default()
    };
    let output = build_graph_with_backend(&mock, "status", &options)
        .await
        .unwrap();
    assert!(output.audit.warnings[0].starts_with("Prompt enhancement skipped"));
    assert_eq!(mock.last_call()[1].content.as_deref(), Some("status"));
}

#[test]
fn test_build_mode_from_str() {
    assert_eq!("EXACT".parse::<BuildMode>().unwrap(), BuildMode::Exact);
    assert_eq!(" interpret".parse::<BuildMode>().unwrap(), BuildMode::Interpret);
    assert!("fuzzy".parse::<BuildMode>().is_err());
}

#[tokio::test]
async fn build_graph_reports_unreachable_oracle() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = crate::LlmConfig {
        base_url: format!("http://127.0.0.1:{}/v1", port),
        request_timeout: Duration::from_secs(5),
        ..crate::LlmConfig::default()
    };

    let err = build_graph("Post a daily digest", BuildMode::Interpret, config)
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::OracleUnreachable { .. }));
    assert!(!err.is_retryable());
}

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::taxonomy::NodeRole;
use crate::{ConnectionMap, Graph, GraphAnalysis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferencePolicy {
    /// Allow two adjacent sinks to be chained by the sequential-gap rule.
    pub allow_sink_chaining: bool,
    /// Attach leftover orphans to the most recent source. When disabled the
    /// orphans are reported instead.
    pub sweep_orphans: bool,
}

impl Default for InferencePolicy {
    fn default() -> Self {
        Self {
            allow_sink_chaining: false,
            sweep_orphans: true,
        }
    }
}

impl InferencePolicy {
    pub fn strict() -> Self {
        Self {
            sweep_orphans: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeReason {
    TriggerToProcessor,
    ProcessorChain,
    ProcessorToSink,
    SequentialGap,
    OrphanSweep,
    /// Proposed by the oracle and checked against the graph.
    Oracle,
}

impl fmt::Display for EdgeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EdgeReason::TriggerToProcessor => "trigger had no outgoing edge",
            EdgeReason::ProcessorChain => "unconnected processors chained in order",
            EdgeReason::ProcessorToSink => "last processor feeds the first output",
            EdgeReason::SequentialGap => "adjacent in node order",
            EdgeReason::OrphanSweep => "orphan attached to the most recent source",
            EdgeReason::Oracle => "proposed by the oracle",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredEdge {
    pub source: String,
    pub target: String,
    pub reason: EdgeReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inference {
    /// Existing edges plus every inferred one.
    pub connections: ConnectionMap,
    pub inferred: Vec<InferredEdge>,
    /// Nodes left without any edge. Always empty when orphans are swept.
    pub orphans: Vec<String>,
}

struct EdgeSet {
    connections: ConnectionMap,
    inferred: Vec<InferredEdge>,
}

impl EdgeSet {
    fn add(&mut self, source: &str, target: &str, reason: EdgeReason) {
        if source == target || self.connections.contains(source, target) {
            return;
        }
        self.connections.connect(source, target);
        tracing::debug!(source, target, %reason, "Inferred connection");
        self.inferred.push(InferredEdge {
            source: source.to_string(),
            target: target.to_string(),
            reason,
        });
    }
}

/// Propose edges that close connectivity gaps. Existing edges are kept and
/// never duplicated, so running this on its own output adds nothing.
pub fn infer_connections(
    graph: &Graph,
    analysis: &GraphAnalysis,
    policy: &InferencePolicy,
) -> Inference {
    let original = &graph.connections;
    let mut edges = EdgeSet {
        connections: original.clone(),
        inferred: Vec::new(),
    };

    let first_processor = analysis.processors.first();
    let first_sink = analysis.sinks.first();

    // Triggers without an outgoing edge feed the first processor.
    if let Some(processor) = first_processor {
        for trigger in &analysis.triggers {
            if !original.has_outbound(trigger) {
                edges.add(trigger, processor, EdgeReason::TriggerToProcessor);
            }
        }
    }

    // Dangling processors form a chain that ends in the first sink.
    let dangling: Vec<&String> = analysis
        .processors
        .iter()
        .filter(|p| !original.has_outbound(p))
        .collect();
    for pair in dangling.windows(2) {
        edges.add(pair[0], pair[1], EdgeReason::ProcessorChain);
    }
    if let (Some(last), Some(sink)) = (dangling.last(), first_sink) {
        edges.add(last, sink, EdgeReason::ProcessorToSink);
    }

    for (from, to) in &analysis.sequential_gaps {
        if edges.connections.has_inbound(to) {
            continue;
        }
        let to_role = analysis.role(to);
        if to_role == Some(NodeRole::Trigger) {
            continue;
        }
        if !policy.allow_sink_chaining
            && analysis.role(from) == Some(NodeRole::Sink)
            && to_role == Some(NodeRole::Sink)
        {
            continue;
        }
        edges.add(from, to, EdgeReason::SequentialGap);
    }

    let mut orphans = orphans_of(graph, &edges.connections);
    if graph.nodes.len() > 1 && !orphans.is_empty() && policy.sweep_orphans {
        let anchor = edges
            .connections
            .last_source()
            .map(str::to_string)
            .or_else(|| graph.nodes.first().map(|n| n.id.clone()));
        if let Some(anchor) = anchor {
            for orphan in &orphans {
                edges.add(&anchor, orphan, EdgeReason::OrphanSweep);
            }
        }
        orphans = orphans_of(graph, &edges.connections);
    }
    if graph.nodes.len() <= 1 {
        orphans.clear();
    }

    if !orphans.is_empty() {
        tracing::warn!(?orphans, "Nodes left without connections");
    }

    Inference {
        connections: edges.connections,
        inferred: edges.inferred,
        orphans,
    }
}

/// Install the inferred edge map on the graph.
pub fn apply_inference(graph: &mut Graph, inference: &Inference) {
    graph.connections = inference.connections.clone();
}

fn orphans_of(graph: &Graph, connections: &ConnectionMap) -> Vec<String> {
    let touched: HashSet<&str> = connections
        .edges()
        .flat_map(|(source, target)| [source, target.node.as_str()])
        .collect();
    graph
        .nodes
        .iter()
        .filter(|n| !touched.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Node, Position, analyze};

    fn graph(nodes: &[(&str, &str)], edges: &[(&str, &str)]) -> Graph {
        let mut graph = Graph::new("test");
        for (i, (id, kind)) in nodes.iter().enumerate() {
            graph
                .insert_node(Node::new(*id, *id, *kind, Position::grid(i)))
                .unwrap();
        }
        for (from, to) in edges {
            graph.connections.connect(from, to);
        }
        graph
    }

    fn run(graph: &mut Graph, policy: &InferencePolicy) -> Inference {
        let analysis = analyze(graph);
        let inference = infer_connections(graph, &analysis, policy);
        apply_inference(graph, &inference);
        inference
    }

    #[test]
    fn trigger_processor_sink_chain() {
        let mut g = graph(
            &[
                ("t1", "trigger.schedule"),
                ("p1", "processor.http"),
                ("s1", "sink.message"),
            ],
            &[],
        );
        let inference = run(&mut g, &InferencePolicy::default());

        assert!(g.connections.contains("t1", "p1"));
        assert!(g.connections.contains("p1", "s1"));
        assert_eq!(g.connections.edge_count(), 2);
        assert!(analyze(&g).unconnected_node_ids.is_empty());

        let reasons: Vec<_> = inference.inferred.iter().map(|e| e.reason).collect();
        assert_eq!(
            reasons,
            vec![EdgeReason::TriggerToProcessor, EdgeReason::ProcessorToSink]
        );
    }

    #[test]
    fn inference_is_idempotent() {
        let mut g = graph(
            &[
                ("w", "n8n-nodes-base.webhook"),
                ("a", "n8n-nodes-base.httpRequest"),
                ("b", "n8n-nodes-base.set"),
                ("c", "n8n-nodes-base.code"),
                ("s1", "n8n-nodes-base.slack"),
                ("s2", "n8n-nodes-base.telegram"),
                ("t2", "n8n-nodes-base.scheduleTrigger"),
            ],
            &[("a", "b")],
        );
        run(&mut g, &InferencePolicy::default());
        let first = g.connections.clone();

        let second = run(&mut g, &InferencePolicy::default());
        assert!(second.inferred.is_empty());
        assert_eq!(g.connections, first);
    }

    #[test]
    fn adjacent_sinks_are_not_chained_before_sweep() {
        let g = graph(&[("s1", "sink.message"), ("s2", "sink.email")], &[]);
        let analysis = analyze(&g);

        let strict = infer_connections(&g, &analysis, &InferencePolicy::strict());
        assert!(strict.inferred.is_empty());
        assert_eq!(strict.orphans, vec!["s1", "s2"]);

        let swept = infer_connections(&g, &analysis, &InferencePolicy::default());
        assert_eq!(swept.inferred.len(), 1);
        assert_eq!(swept.inferred[0].reason, EdgeReason::OrphanSweep);
        assert!(swept.orphans.is_empty());

        let permissive = InferencePolicy {
            allow_sink_chaining: true,
            ..InferencePolicy::default()
        };
        let chained = infer_connections(&g, &analysis, &permissive);
        assert_eq!(chained.inferred[0].reason, EdgeReason::SequentialGap);
    }

    #[test]
    fn orphans_attach_to_most_recent_source() {
        let mut g = graph(
            &[
                ("w1", "x.webhook"),
                ("s1", "x.slack"),
                ("w2", "x.webhook"),
                ("s2", "x.telegram"),
                ("s3", "x.gmail"),
            ],
            &[("w1", "s1"), ("w2", "s2")],
        );
        let inference = run(&mut g, &InferencePolicy::default());
        assert_eq!(
            inference.inferred,
            vec![InferredEdge {
                source: "w2".to_string(),
                target: "s3".to_string(),
                reason: EdgeReason::OrphanSweep,
            }]
        );
        assert!(analyze(&g).unconnected_node_ids.is_empty());
    }

    #[test]
    fn every_node_connected_after_sweep() {
        let kinds = [
            "x.webhook",
            "x.cron",
            "x.slack",
            "x.set",
            "x.respondToWebhook",
            "x.if",
            "x.gmail",
        ];
        for len in 2..=kinds.len() {
            let nodes: Vec<(String, &str)> = kinds[..len]
                .iter()
                .enumerate()
                .map(|(i, k)| (format!("n{}", i), *k))
                .collect();
            let refs: Vec<(&str, &str)> = nodes.iter().map(|(id, k)| (id.as_str(), *k)).collect();
            let mut g = graph(&refs, &[]);
            run(&mut g, &InferencePolicy::default());
            assert!(analyze(&g).unconnected_node_ids.is_empty(), "len {}", len);
        }
    }

    #[test]
    fn single_node_is_left_alone() {
        let mut g = graph(&[("only", "x.webhook")], &[]);
        let inference = run(&mut g, &InferencePolicy::strict());
        assert!(inference.inferred.is_empty());
        assert!(inference.orphans.is_empty());
    }

    #[test]
    fn existing_trigger_edges_are_respected() {
        let mut g = graph(
            &[("t", "x.trigger"), ("p1", "x.set"), ("p2", "x.set")],
            &[("t", "p2")],
        );
        let inference = run(&mut g, &InferencePolicy::default());
        let reasons: Vec<_> = inference.inferred.iter().map(|e| e.reason).collect();
        assert_eq!(
            reasons,
            vec![EdgeReason::ProcessorChain, EdgeReason::SequentialGap]
        );
        assert!(g.connections.contains("p1", "p2"));
        assert!(g.connections.contains("t", "p1"));
    }
}

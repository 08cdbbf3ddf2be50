use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use serde::Serialize;

use crate::Graph;
use crate::taxonomy::{NodeRole, classify};

/// Read-only measurements of a graph. Every list follows node insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphAnalysis {
    pub connected_node_ids: Vec<String>,
    pub unconnected_node_ids: Vec<String>,
    pub triggers: Vec<String>,
    pub sinks: Vec<String>,
    pub processors: Vec<String>,
    /// Adjacent pairs `(n_i, n_{i+1})` without an edge `n_i -> n_{i+1}`.
    pub sequential_gaps: Vec<(String, String)>,
    pub depths: Vec<(String, usize)>,
}

impl GraphAnalysis {
    pub fn depth(&self, id: &str) -> Option<usize> {
        self.depths.iter().find(|(n, _)| n == id).map(|(_, d)| *d)
    }

    pub fn role(&self, id: &str) -> Option<NodeRole> {
        if self.triggers.iter().any(|t| t == id) {
            Some(NodeRole::Trigger)
        } else if self.sinks.iter().any(|s| s == id) {
            Some(NodeRole::Sink)
        } else if self.processors.iter().any(|p| p == id) {
            Some(NodeRole::Processor)
        } else {
            None
        }
    }

    pub fn is_fully_connected(&self) -> bool {
        self.unconnected_node_ids.is_empty()
    }

    /// Human-readable connection report.
    pub fn report(&self, graph: &Graph) -> String {
        let name_of = |id: &str| {
            graph
                .find_node(id)
                .map(|n| n.name.clone())
                .unwrap_or_else(|| id.to_string())
        };

        let mut out = String::new();
        let _ = writeln!(out, "Workflow: {}", graph.name);
        let _ = writeln!(
            out,
            "Nodes: {} ({} connected, {} unconnected)",
            graph.nodes.len(),
            self.connected_node_ids.len(),
            self.unconnected_node_ids.len()
        );
        let _ = writeln!(out, "Connections: {}", graph.connections.edge_count());
        let _ = writeln!(
            out,
            "Triggers: {}, processors: {}, outputs: {}",
            self.triggers.len(),
            self.processors.len(),
            self.sinks.len()
        );

        if self.is_fully_connected() {
            let _ = writeln!(out, "All nodes are connected.");
        } else {
            let _ = writeln!(out, "Unconnected nodes:");
            for id in &self.unconnected_node_ids {
                let _ = writeln!(out, "  - {}", name_of(id.as_str()));
            }
        }

        if !self.sequential_gaps.is_empty() {
            let _ = writeln!(out, "Sequential gaps:");
            for (from, to) in &self.sequential_gaps {
                let _ = writeln!(out, "  - {} -> {}", name_of(from.as_str()), name_of(to.as_str()));
            }
        }
        out
    }
}

/// Classify and measure a graph. Never fails.
pub fn analyze(graph: &Graph) -> GraphAnalysis {
    let mut analysis = GraphAnalysis::default();

    let mut touched: HashSet<&str> = HashSet::new();
    for (source, target) in graph.connections.edges() {
        touched.insert(source);
        touched.insert(target.node.as_str());
    }

    for node in &graph.nodes {
        if touched.contains(node.id.as_str()) {
            analysis.connected_node_ids.push(node.id.clone());
        } else {
            analysis.unconnected_node_ids.push(node.id.clone());
        }
        match classify(&node.kind) {
            NodeRole::Trigger => analysis.triggers.push(node.id.clone()),
            NodeRole::Sink => analysis.sinks.push(node.id.clone()),
            NodeRole::Processor => analysis.processors.push(node.id.clone()),
        }
    }

    for pair in graph.nodes.windows(2) {
        let (current, next) = (&pair[0], &pair[1]);
        if !graph.connections.contains(&current.id, &next.id) {
            analysis
                .sequential_gaps
                .push((current.id.clone(), next.id.clone()));
        }
    }

    let mut predecessors: HashMap<&str, Vec<&str>> = HashMap::new();
    for (source, target) in graph.connections.edges() {
        let preds = predecessors.entry(target.node.as_str()).or_default();
        if !preds.contains(&source) {
            preds.push(source);
        }
    }

    let mut depths = DepthCalculator {
        predecessors: &predecessors,
        memo: HashMap::new(),
        on_stack: HashSet::new(),
    };
    for node in &graph.nodes {
        let depth = depths.depth(&node.id);
        analysis.depths.push((node.id.clone(), depth));
    }

    analysis
}

struct DepthCalculator<'a> {
    predecessors: &'a HashMap<&'a str, Vec<&'a str>>,
    memo: HashMap<&'a str, usize>,
    on_stack: HashSet<&'a str>,
}

impl<'a> DepthCalculator<'a> {
    /// Longest predecessor chain ending at `id`. A node met again while its
    /// own depth is being computed counts as 0 on that path.
    fn depth(&mut self, id: &'a str) -> usize {
        if let Some(depth) = self.memo.get(id) {
            return *depth;
        }
        if !self.on_stack.insert(id) {
            return 0;
        }

        let predecessors = self.predecessors;
        let preds = predecessors.get(id).map(Vec::as_slice).unwrap_or(&[]);
        let mut depth = 0;
        for &pred in preds {
            depth = depth.max(self.depth(pred) + 1);
        }

        self.on_stack.remove(id);
        self.memo.insert(id, depth);
        depth
    }
}

use crate::{Graph, GraphAnalysis, Position};

const ORIGIN: f64 = 200.0;
const COLUMN_WIDTH: f64 = 350.0;
const ROW_HEIGHT: f64 = 200.0;

/// Place nodes in columns by depth, stacking each column in insertion order.
pub fn layout_by_depth(graph: &mut Graph, analysis: &GraphAnalysis) {
    let mut column_heights: Vec<usize> = Vec::new();
    for node in &mut graph.nodes {
        let depth = analysis.depth(&node.id).unwrap_or(0);
        if column_heights.len() <= depth {
            column_heights.resize(depth + 1, 0);
        }
        let row = column_heights[depth];
        column_heights[depth] += 1;
        node.position = Position {
            x: ORIGIN + depth as f64 * COLUMN_WIDTH,
            y: ORIGIN + row as f64 * ROW_HEIGHT,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Node, analyze};

    #[test]
    fn columns_follow_depth() {
        let mut graph = Graph::new("layout");
        for id in ["t", "a", "b", "s"] {
            graph
                .insert_node(Node::new(id, id, "x.set", Position::default()))
                .unwrap();
        }
        graph.connect("t", "a");
        graph.connect("t", "b");
        graph.connect("a", "s");

        let analysis = analyze(&graph);
        layout_by_depth(&mut graph, &analysis);

        let pos = |id: &str| graph.find_node(id).unwrap().position;
        assert_eq!(pos("t"), Position { x: 200.0, y: 200.0 });
        assert_eq!(pos("a"), Position { x: 550.0, y: 200.0 });
        assert_eq!(pos("b"), Position { x: 550.0, y: 400.0 });
        assert_eq!(pos("s"), Position { x: 900.0, y: 200.0 });
    }
}

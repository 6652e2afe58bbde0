//! One-time graph rewriting pass run before evaluation.

use std::sync::Arc;

use super::{Graph, NodeId};
use crate::error::GraphError;
use crate::node::Node;

/// Upper bound on rewriting passes. Each pass only amplifies nodes injected
/// by the previous one, so real graphs settle in two or three.
const MAX_PASSES: usize = 16;

/// Let every node inject its helper nodes and edges, repeating until no
/// un-amplified node is left.
///
/// Nodes are flagged as amplified once processed, so running this on its own
/// output is a no-op. Amplifying nodes also recognise a topology they already
/// rewrote, which keeps the pass idempotent even without the flags.
///
/// # Errors
///
/// Propagates node amplification errors and returns
/// [`GraphError::AmplificationDiverged`] if no fixed point is reached.
pub fn amplify(mut graph: Graph) -> Result<Graph, GraphError> {
    for pass in 1..=MAX_PASSES {
        let pending: Vec<(NodeId, Arc<dyn Node>)> = graph
            .nodes()
            .filter(|(id, _)| !graph.is_amplified(*id))
            .map(|(id, node)| (id, Arc::clone(node)))
            .collect();
        if pending.is_empty() {
            return Ok(graph);
        }

        let nodes_before = graph.node_count();
        let edges_before = graph.edges().len();
        for (id, node) in pending {
            node.amplify(id, &mut graph)?;
            graph.mark_amplified(id);
        }
        tracing::debug!(
            pass,
            injected_nodes = graph.node_count() - nodes_before,
            edges_delta = graph.edges().len() as i64 - edges_before as i64,
            "amplification pass"
        );
    }
    Err(GraphError::AmplificationDiverged(MAX_PASSES))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Endpoint, TreeKind};
    use crate::nodes::{ApplyMaskNode, ConstantNode, GradientNode, HeightOutputNode, ScaleNode};

    fn masked_and_scaled() -> Graph {
        let mut graph = Graph::new(TreeKind::Height);
        let source = graph.add_node(GradientNode::default());
        let mask = graph.add_node(ConstantNode::new(0.5));
        let apply = graph.add_node(ApplyMaskNode::default());
        let scale = graph.add_node(ScaleNode {
            factor: 2.0,
            spatial: 0.5,
        });
        let out = graph.add_node(HeightOutputNode::new("height"));
        graph.connect(Endpoint::new(source, "Output"), Endpoint::new(apply, "Input"));
        graph.connect(Endpoint::new(mask, "Output"), Endpoint::new(apply, "Mask"));
        graph.connect(Endpoint::new(apply, "Output"), Endpoint::new(scale, "Input"));
        graph.connect(Endpoint::new(scale, "Output"), Endpoint::new(out, "Input"));
        graph
    }

    fn sorted_edges(graph: &Graph) -> Vec<Edge> {
        let mut edges = graph.edges().to_vec();
        edges.sort_by_key(|e| (e.source.node, e.target.node, e.target.port.clone()));
        edges
    }

    #[test]
    fn test_injects_validator_and_grid_scale() {
        let graph = amplify(masked_and_scaled()).unwrap();
        let names: Vec<&str> = graph.nodes().map(|(_, n)| n.type_name()).collect();
        assert!(names.contains(&"MaskValidator"), "{names:?}");
        assert!(names.contains(&"GridScale"), "{names:?}");
        assert_eq!(graph.node_count(), 7);
    }

    #[test]
    fn test_second_run_is_noop() {
        let once = amplify(masked_and_scaled()).unwrap();
        let edges = sorted_edges(&once);
        let count = once.node_count();

        let twice = amplify(once).unwrap();
        assert_eq!(twice.node_count(), count);
        assert_eq!(sorted_edges(&twice), edges);
    }

    #[test]
    fn test_idempotent_without_flags() {
        let once = amplify(masked_and_scaled()).unwrap();
        let edges = sorted_edges(&once);
        let count = once.node_count();

        let mut unflagged = once.clone();
        unflagged.clear_amplified();
        let again = amplify(unflagged).unwrap();
        assert_eq!(again.node_count(), count);
        assert_eq!(sorted_edges(&again), edges);
    }

    #[test]
    fn test_amplified_graph_still_validates() {
        let graph = amplify(masked_and_scaled()).unwrap();
        assert!(crate::graph::validate(&graph).is_ok());
    }

    #[test]
    fn test_plain_graph_unchanged() {
        let mut graph = Graph::new(TreeKind::Height);
        let c = graph.add_node(ConstantNode::new(1.0));
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(c, "Output"), Endpoint::new(out, "Input"));
        let amplified = amplify(graph).unwrap();
        assert_eq!(amplified.node_count(), 2);
        assert_eq!(amplified.edges().len(), 1);
        assert!(amplified.is_amplified(c));
    }
}

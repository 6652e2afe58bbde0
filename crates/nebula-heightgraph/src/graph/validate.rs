//! Structural and semantic validation of a graph.

use std::collections::{BTreeMap, VecDeque};

use super::{Edge, Graph, NodeId};
use crate::error::GraphError;
use crate::node::{PortDirection, PortType, find_port};

/// Check a graph before (and again after) amplification.
///
/// Checks, in order: edge endpoints exist and name real ports of the right
/// direction, value types on both ends agree, single-valued inputs have at
/// most one edge, positional list slots are unique and gap-free, required
/// inputs are connected, node types are allowed in the tree, the graph is
/// acyclic, output names are present and unique, and finally each node's own
/// rules.
///
/// # Errors
///
/// Returns the first violation found.
pub fn validate(graph: &Graph) -> Result<(), GraphError> {
    for edge in graph.edges() {
        check_edge(graph, edge)?;
    }
    check_multiplicity(graph)?;
    check_nodes(graph)?;
    check_acyclic(graph)?;
    check_outputs(graph)?;
    for (id, node) in graph.nodes() {
        node.validate(id, graph)?;
    }
    Ok(())
}

fn check_edge(graph: &Graph, edge: &Edge) -> Result<(), GraphError> {
    let source_node = graph
        .node(edge.source.node)
        .ok_or(GraphError::DanglingEdge {
            node: edge.source.node,
        })?;
    let target_node = graph
        .node(edge.target.node)
        .ok_or(GraphError::DanglingEdge {
            node: edge.target.node,
        })?;

    let source_port = find_port(source_node.ports(), &edge.source.port, PortDirection::Output)
        .ok_or_else(|| GraphError::UnknownPort {
            node: edge.source.node,
            node_type: source_node.type_name(),
            port: edge.source.port.clone(),
            direction: "output",
        })?;
    let target_port = find_port(target_node.ports(), &edge.target.port, PortDirection::Input)
        .ok_or_else(|| GraphError::UnknownPort {
            node: edge.target.node,
            node_type: target_node.type_name(),
            port: edge.target.port.clone(),
            direction: "input",
        })?;

    let mismatch = |reason| GraphError::TypeMismatch {
        source_node: edge.source.node,
        source_port: edge.source.port.clone(),
        target_node: edge.target.node,
        target_port: edge.target.port.clone(),
        reason,
    };

    let carried = match (source_port.ty, edge.source.index) {
        (PortType::Height, None) => PortType::Height,
        (PortType::Height, Some(_)) => return Err(mismatch("element index on a single-valued output")),
        (PortType::HeightList, None) => PortType::HeightList,
        (PortType::HeightList, Some(_)) => PortType::Height,
    };

    match (target_port.ty, edge.target.index, carried) {
        (PortType::Height, None, PortType::Height) => Ok(()),
        (PortType::Height, Some(_), _) => Err(mismatch("slot index on a single-valued input")),
        (PortType::Height, None, PortType::HeightList) => {
            Err(mismatch("list connected to a single-valued input"))
        }
        (PortType::HeightList, Some(_), PortType::Height) => Ok(()),
        (PortType::HeightList, Some(_), PortType::HeightList) => {
            Err(mismatch("list connected to a single list slot"))
        }
        (PortType::HeightList, None, PortType::HeightList) => Ok(()),
        (PortType::HeightList, None, PortType::Height) => {
            Err(mismatch("single value connected to a list input without a slot index"))
        }
    }
}

fn check_multiplicity(graph: &Graph) -> Result<(), GraphError> {
    let mut by_port: BTreeMap<(NodeId, &str), Vec<&Edge>> = BTreeMap::new();
    for edge in graph.edges() {
        by_port
            .entry((edge.target.node, edge.target.port.as_str()))
            .or_default()
            .push(edge);
    }

    for ((node, port), edges) in by_port {
        let whole = edges.iter().filter(|e| e.target.index.is_none()).count();
        if whole > 1 || (whole == 1 && edges.len() > 1) {
            return Err(GraphError::MultipleConnections {
                node,
                port: port.to_string(),
            });
        }

        let mut slots: Vec<usize> = edges.iter().filter_map(|e| e.target.index).collect();
        slots.sort_unstable();
        for (expected, slot) in slots.iter().enumerate() {
            if *slot < expected {
                return Err(GraphError::MultipleConnections {
                    node,
                    port: port.to_string(),
                });
            }
            if *slot > expected {
                return Err(GraphError::ListGap {
                    node,
                    port: port.to_string(),
                    index: expected,
                });
            }
        }
    }
    Ok(())
}

fn check_nodes(graph: &Graph) -> Result<(), GraphError> {
    for (id, node) in graph.nodes() {
        if !node.allowed_in(graph.tree()) {
            return Err(GraphError::DisallowedNode {
                node: id,
                node_type: node.type_name(),
                tree: graph.tree(),
            });
        }
        for port in node.ports() {
            if port.direction == PortDirection::Input
                && port.required
                && graph.edges_into(id, port.name).next().is_none()
            {
                return Err(GraphError::MissingInput {
                    node: id,
                    port: port.name,
                });
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm; whatever cannot be ordered sits on a cycle.
fn check_acyclic(graph: &Graph) -> Result<(), GraphError> {
    let mut in_degree: BTreeMap<NodeId, usize> = graph.nodes().map(|(id, _)| (id, 0)).collect();
    let mut successors: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    for edge in graph.edges() {
        *in_degree.entry(edge.target.node).or_default() += 1;
        successors
            .entry(edge.source.node)
            .or_default()
            .push(edge.target.node);
    }

    let mut ready: VecDeque<NodeId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut ordered = 0;
    while let Some(id) = ready.pop_front() {
        ordered += 1;
        for next in successors.get(&id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(*next);
                }
            }
        }
    }

    if ordered == in_degree.len() {
        Ok(())
    } else {
        let nodes = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id)
            .collect();
        Err(GraphError::Cycle { nodes })
    }
}

fn check_outputs(graph: &Graph) -> Result<(), GraphError> {
    let mut names: Vec<&str> = graph
        .nodes()
        .filter_map(|(_, node)| node.output_name())
        .collect();
    if names.is_empty() {
        return Err(GraphError::NoOutputs);
    }
    names.sort_unstable();
    for pair in names.windows(2) {
        if pair[0] == pair[1] {
            return Err(GraphError::DuplicateOutput(pair[0].to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Endpoint, TreeKind};
    use crate::nodes::{
        BiomeCombineNode, ClampNode, CombineNode, ConstantNode, HeightOutputNode, InterpolateNode,
    };

    fn constant_into_output() -> (Graph, NodeId, NodeId) {
        let mut graph = Graph::new(TreeKind::Height);
        let c = graph.add_node(ConstantNode::new(1.0));
        let out = graph.add_node(HeightOutputNode::new("height"));
        graph.connect(Endpoint::new(c, "Output"), Endpoint::new(out, "Input"));
        (graph, c, out)
    }

    #[test]
    fn test_minimal_graph_is_valid() {
        let (graph, _, _) = constant_into_output();
        assert!(validate(&graph).is_ok());
    }

    #[test]
    fn test_dangling_edge() {
        let (mut graph, c, _) = constant_into_output();
        graph.connect(Endpoint::new(c, "Output"), Endpoint::new(NodeId(99), "Input"));
        assert!(matches!(
            validate(&graph),
            Err(GraphError::DanglingEdge { node: NodeId(99) })
        ));
    }

    #[test]
    fn test_unknown_port_and_wrong_direction() {
        let (mut graph, c, _) = constant_into_output();
        let clamp = graph.add_node(ClampNode::new(0.0, 1.0));
        graph.connect(Endpoint::new(c, "Output"), Endpoint::new(clamp, "Nope"));
        assert!(matches!(
            validate(&graph),
            Err(GraphError::UnknownPort { direction: "input", .. })
        ));

        let (mut graph, _, out) = constant_into_output();
        let clamp = graph.add_node(ClampNode::new(0.0, 1.0));
        // `Input` is an input of the output node, not an output.
        graph.connect(Endpoint::new(out, "Input"), Endpoint::new(clamp, "Input"));
        assert!(matches!(
            validate(&graph),
            Err(GraphError::UnknownPort { direction: "output", .. })
        ));
    }

    #[test]
    fn test_list_to_single_input_is_type_mismatch() {
        let mut graph = Graph::new(TreeKind::Height);
        let a = graph.add_node(ConstantNode::new(1.0));
        let combine = graph.add_node(CombineNode {
            emit_weights: true,
            ..CombineNode::default()
        });
        let clamp = graph.add_node(ClampNode::new(0.0, 1.0));
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(a, "Output"), Endpoint::at(combine, "Inputs", 0));
        graph.connect(Endpoint::new(combine, "Weights"), Endpoint::new(clamp, "Input"));
        graph.connect(Endpoint::new(clamp, "Output"), Endpoint::new(out, "Input"));
        assert!(matches!(validate(&graph), Err(GraphError::TypeMismatch { .. })));
    }

    #[test]
    fn test_single_value_into_list_needs_slot() {
        let mut graph = Graph::new(TreeKind::Height);
        let a = graph.add_node(ConstantNode::new(1.0));
        let combine = graph.add_node(CombineNode::default());
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(a, "Output"), Endpoint::new(combine, "Inputs"));
        graph.connect(Endpoint::new(combine, "Output"), Endpoint::new(out, "Input"));
        assert!(matches!(validate(&graph), Err(GraphError::TypeMismatch { .. })));
    }

    #[test]
    fn test_second_edge_into_single_input() {
        let (mut graph, c, out) = constant_into_output();
        graph.connect(Endpoint::new(c, "Output"), Endpoint::new(out, "Input"));
        assert!(matches!(
            validate(&graph),
            Err(GraphError::MultipleConnections { .. })
        ));
    }

    #[test]
    fn test_list_gap_and_duplicate_slot() {
        let mut graph = Graph::new(TreeKind::Height);
        let a = graph.add_node(ConstantNode::new(1.0));
        let combine = graph.add_node(CombineNode::default());
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(a, "Output"), Endpoint::at(combine, "Inputs", 0));
        graph.connect(Endpoint::new(a, "Output"), Endpoint::at(combine, "Inputs", 2));
        graph.connect(Endpoint::new(combine, "Output"), Endpoint::new(out, "Input"));
        assert!(matches!(
            validate(&graph),
            Err(GraphError::ListGap { index: 1, .. })
        ));

        graph.connect(Endpoint::new(a, "Output"), Endpoint::at(combine, "Inputs", 0));
        assert!(validate(&graph).is_err());
    }

    #[test]
    fn test_missing_required_input() {
        let mut graph = Graph::new(TreeKind::Height);
        let a = graph.add_node(ConstantNode::new(1.0));
        let lerp = graph.add_node(InterpolateNode);
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(a, "Output"), Endpoint::new(lerp, "A"));
        graph.connect(Endpoint::new(a, "Output"), Endpoint::new(lerp, "B"));
        graph.connect(Endpoint::new(lerp, "Output"), Endpoint::new(out, "Input"));
        assert!(matches!(
            validate(&graph),
            Err(GraphError::MissingInput { port: "Strength", .. })
        ));
    }

    #[test]
    fn test_biome_combine_disallowed_in_height_tree() {
        let mut graph = Graph::new(TreeKind::Height);
        let a = graph.add_node(ConstantNode::new(1.0));
        let biome = graph.add_node(BiomeCombineNode::default());
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(a, "Output"), Endpoint::at(biome, "Heights", 0));
        graph.connect(Endpoint::new(a, "Output"), Endpoint::at(biome, "Weights", 0));
        graph.connect(Endpoint::new(biome, "Output"), Endpoint::new(out, "Input"));
        assert!(matches!(
            validate(&graph),
            Err(GraphError::DisallowedNode { tree: TreeKind::Height, .. })
        ));
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut graph = Graph::new(TreeKind::Height);
        let a = graph.add_node(ClampNode::new(0.0, 1.0));
        let b = graph.add_node(ClampNode::new(0.0, 1.0));
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(a, "Output"), Endpoint::new(b, "Input"));
        graph.connect(Endpoint::new(b, "Output"), Endpoint::new(a, "Input"));
        graph.connect(Endpoint::new(b, "Output"), Endpoint::new(out, "Input"));
        match validate(&graph) {
            Err(GraphError::Cycle { nodes }) => {
                assert!(nodes.contains(&a));
                assert!(nodes.contains(&b));
            }
            other => panic!("expected a cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_outputs_required_and_unique() {
        let mut graph = Graph::new(TreeKind::Height);
        graph.add_node(ConstantNode::new(1.0));
        assert!(matches!(validate(&graph), Err(GraphError::NoOutputs)));

        let (mut graph, c, _) = constant_into_output();
        let second = graph.add_node(HeightOutputNode::new("height"));
        graph.connect(Endpoint::new(c, "Output"), Endpoint::new(second, "Input"));
        assert!(matches!(
            validate(&graph),
            Err(GraphError::DuplicateOutput(name)) if name == "height"
        ));
    }
}

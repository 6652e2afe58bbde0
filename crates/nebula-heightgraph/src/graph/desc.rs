//! Serializable graph description, as produced by an editor or written by
//! hand in RON or JSON.
//!
//! ```ron
//! (
//!     tree: Height,
//!     nodes: [
//!         (id: 1, kind: Constant((value: 5.0, range: Some((min: 0.0, max: 10.0))))),
//!         (id: 2, kind: Clamp((min: 0.0, max: 3.0))),
//!         (id: 3, kind: HeightOutput((name: "height"))),
//!     ],
//!     edges: [
//!         (from: (node: 1, port: "Output"), to: (node: 2, port: "Input")),
//!         (from: (node: 2, port: "Output"), to: (node: 3, port: "Input")),
//!     ],
//! )
//! ```

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::{Endpoint, Graph, NodeId, TreeKind};
use crate::error::GraphError;
use crate::nodes::NodeKind;

/// Whole graph description.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphDesc {
    /// Kind of tree.
    #[serde(default)]
    pub tree: TreeKind,
    /// Nodes with their parameters.
    pub nodes: Vec<NodeDesc>,
    /// Connections.
    #[serde(default)]
    pub edges: Vec<EdgeDesc>,
}

/// One node of a [`GraphDesc`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeDesc {
    /// Unique id.
    pub id: NodeId,
    /// Node type and parameters.
    pub kind: NodeKind,
}

/// One side of an [`EdgeDesc`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointDesc {
    /// Node id.
    pub node: NodeId,
    /// Port name.
    pub port: String,
    /// List element or slot. `-1` on an input appends to the list.
    #[serde(default)]
    pub index: Option<i64>,
}

/// One connection of a [`GraphDesc`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeDesc {
    /// Producing side.
    pub from: EndpointDesc,
    /// Consuming side.
    pub to: EndpointDesc,
}

impl GraphDesc {
    /// Parse a RON description.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Parse`] on malformed input.
    pub fn from_ron(text: &str) -> Result<Self, GraphError> {
        ron::from_str(text).map_err(|e| GraphError::Parse(e.to_string()))
    }

    /// Parse a JSON description.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Parse`] on malformed input.
    pub fn from_json(text: &str) -> Result<Self, GraphError> {
        serde_json::from_str(text).map_err(|e| GraphError::Parse(e.to_string()))
    }

    /// Serialize to pretty RON.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Parse`] if serialization fails.
    pub fn to_ron(&self) -> Result<String, GraphError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| GraphError::Parse(e.to_string()))
    }
}

fn source_endpoint(desc: &EndpointDesc, target: &EndpointDesc) -> Result<Endpoint, GraphError> {
    match desc.index {
        None => Ok(Endpoint::new(desc.node, desc.port.clone())),
        Some(index) => usize::try_from(index)
            .map(|index| Endpoint::at(desc.node, desc.port.clone(), index))
            .map_err(|_| GraphError::TypeMismatch {
                source_node: desc.node,
                source_port: desc.port.clone(),
                target_node: target.node,
                target_port: target.port.clone(),
                reason: "negative list index on an output",
            }),
    }
}

impl Graph {
    /// Build a graph from a description, resolving appended list slots to
    /// concrete positions in edge order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNode`] for repeated ids and
    /// [`GraphError::TypeMismatch`] for negative indices other than `-1` on
    /// inputs.
    pub fn from_desc(desc: GraphDesc) -> Result<Graph, GraphError> {
        let mut graph = Graph::new(desc.tree);
        for node in desc.nodes {
            graph.insert_node(node.id, node.kind.into_node())?;
        }

        // Next free slot per list input, counting explicit and appended slots.
        let mut next_slot: HashMap<(NodeId, String), usize> = HashMap::new();
        for edge in &desc.edges {
            if let Some(index) = edge.to.index.and_then(|i| usize::try_from(i).ok()) {
                let slot = next_slot
                    .entry((edge.to.node, edge.to.port.clone()))
                    .or_default();
                *slot = (*slot).max(index + 1);
            }
        }

        for edge in desc.edges {
            let source = source_endpoint(&edge.from, &edge.to)?;
            let target = match edge.to.index {
                None => Endpoint::new(edge.to.node, edge.to.port),
                Some(-1) => {
                    let slot = next_slot
                        .entry((edge.to.node, edge.to.port.clone()))
                        .or_default();
                    let index = *slot;
                    *slot += 1;
                    Endpoint::at(edge.to.node, edge.to.port, index)
                }
                Some(index) => match usize::try_from(index) {
                    Ok(index) => Endpoint::at(edge.to.node, edge.to.port, index),
                    Err(_) => {
                        return Err(GraphError::TypeMismatch {
                            source_node: source.node,
                            source_port: source.port,
                            target_node: edge.to.node,
                            target_port: edge.to.port,
                            reason: "list slot must be -1 (append) or non-negative",
                        });
                    }
                },
            };
            graph.connect(source, target);
        }

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLAMP_GRAPH: &str = r#"(
        tree: Height,
        nodes: [
            (id: 1, kind: Constant((value: 5.0, range: Some((min: 0.0, max: 10.0))))),
            (id: 2, kind: Clamp((min: 0.0, max: 3.0))),
            (id: 3, kind: HeightOutput((name: "height"))),
        ],
        edges: [
            (from: (node: 1, port: "Output"), to: (node: 2, port: "Input")),
            (from: (node: 2, port: "Output"), to: (node: 3, port: "Input")),
        ],
    )"#;

    #[test]
    fn test_from_ron_builds_graph() {
        let desc = GraphDesc::from_ron(CLAMP_GRAPH).unwrap();
        let graph = Graph::from_desc(desc).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edges().len(), 2);
        assert_eq!(graph.node(NodeId(2)).unwrap().type_name(), "Clamp");
    }

    #[test]
    fn test_from_json_builds_graph() {
        let json = r#"{
            "nodes": [
                {"id": 1, "kind": {"Constant": {"value": 1.0}}},
                {"id": 2, "kind": {"HeightOutput": {"name": "h"}}}
            ],
            "edges": [
                {"from": {"node": 1, "port": "Output"}, "to": {"node": 2, "port": "Input"}}
            ]
        }"#;
        let graph = Graph::from_desc(GraphDesc::from_json(json).unwrap()).unwrap();
        assert_eq!(graph.tree(), TreeKind::Height);
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn test_append_slots_follow_explicit_ones() {
        let ron = r#"(
            nodes: [
                (id: 1, kind: Constant((value: 1.0))),
                (id: 2, kind: Constant((value: 2.0))),
                (id: 3, kind: Constant((value: 3.0))),
                (id: 4, kind: Combine((operation: Add))),
                (id: 5, kind: HeightOutput((name: "h"))),
            ],
            edges: [
                (from: (node: 1, port: "Output"), to: (node: 4, port: "Inputs", index: Some(-1))),
                (from: (node: 2, port: "Output"), to: (node: 4, port: "Inputs", index: Some(0))),
                (from: (node: 3, port: "Output"), to: (node: 4, port: "Inputs", index: Some(-1))),
                (from: (node: 4, port: "Output"), to: (node: 5, port: "Input")),
            ],
        )"#;
        let graph = Graph::from_desc(GraphDesc::from_ron(ron).unwrap()).unwrap();
        let slots: Vec<(NodeId, Option<usize>)> = graph
            .edges_into(NodeId(4), "Inputs")
            .map(|e| (e.source.node, e.target.index))
            .collect();
        assert_eq!(
            slots,
            vec![(NodeId(1), Some(1)), (NodeId(2), Some(0)), (NodeId(3), Some(2))]
        );
    }

    #[test]
    fn test_negative_slot_rejected() {
        let ron = r#"(
            nodes: [
                (id: 1, kind: Constant((value: 1.0))),
                (id: 2, kind: Combine((operation: Add))),
            ],
            edges: [
                (from: (node: 1, port: "Output"), to: (node: 2, port: "Inputs", index: Some(-3))),
            ],
        )"#;
        let err = Graph::from_desc(GraphDesc::from_ron(ron).unwrap()).unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { .. }));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let ron = r#"(
            nodes: [
                (id: 1, kind: Constant((value: 1.0))),
                (id: 1, kind: Constant((value: 2.0))),
            ],
        )"#;
        let err = Graph::from_desc(GraphDesc::from_ron(ron).unwrap()).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode(NodeId(1))));
    }

    #[test]
    fn test_malformed_input_is_parse_error() {
        assert!(matches!(
            GraphDesc::from_ron("(nodes: [").unwrap_err(),
            GraphError::Parse(_)
        ));
        assert!(matches!(
            GraphDesc::from_json("{").unwrap_err(),
            GraphError::Parse(_)
        ));
    }

    #[test]
    fn test_ron_round_trip_keeps_structure() {
        let desc = GraphDesc::from_ron(CLAMP_GRAPH).unwrap();
        let text = desc.to_ron().unwrap();
        let again = GraphDesc::from_ron(&text).unwrap();
        assert_eq!(again.nodes.len(), 3);
        assert_eq!(again.edges.len(), 2);
    }
}

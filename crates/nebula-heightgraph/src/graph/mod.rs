//! The node/edge collection and its finalization pipeline.
//!
//! A [`Graph`] is built once (from a [`GraphDesc`] or programmatically),
//! then [`Graph::finalize`] validates it, runs amplification to a fixed point,
//! validates the rewritten graph again and freezes it into a
//! [`FinalizedGraph`]. Only finalized graphs can be evaluated; they are
//! read-only and may be shared by concurrent branch evaluations.

mod amplify;
mod desc;
mod validate;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::node::Node;

pub use amplify::amplify;
pub use desc::{EdgeDesc, EndpointDesc, GraphDesc, NodeDesc};
pub use validate::validate;

/// Identity of a node within a graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a graph computes; some node types only make sense in one kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TreeKind {
    /// A terrain height tree.
    #[default]
    Height,
    /// A biome tree, combining per-biome heights by weight.
    Biome,
}

/// One side of an edge: a port on a node, optionally a list element.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Node owning the port.
    pub node: NodeId,
    /// Port name from the node's port table.
    pub port: String,
    /// List element (on outputs) or list slot (on inputs).
    pub index: Option<usize>,
}

impl Endpoint {
    /// Endpoint on a whole port.
    pub fn new(node: NodeId, port: impl Into<String>) -> Self {
        Self {
            node,
            port: port.into(),
            index: None,
        }
    }

    /// Endpoint on one element of a list port.
    pub fn at(node: NodeId, port: impl Into<String>, index: usize) -> Self {
        Self {
            node,
            port: port.into(),
            index: Some(index),
        }
    }

    fn is(&self, node: NodeId, port: &str) -> bool {
        self.node == node && self.port == port
    }
}

/// A directed connection from an output port to an input port.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Producing side.
    pub source: Endpoint,
    /// Consuming side.
    pub target: Endpoint,
}

/// Mutable graph, before finalization.
#[derive(Clone, Debug)]
pub struct Graph {
    tree: TreeKind,
    nodes: BTreeMap<NodeId, Arc<dyn Node>>,
    edges: Vec<Edge>,
    amplified: BTreeSet<NodeId>,
}

impl Graph {
    /// Create an empty graph of the given kind.
    pub fn new(tree: TreeKind) -> Self {
        Self {
            tree,
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            amplified: BTreeSet::new(),
        }
    }

    /// Kind of tree this graph describes.
    pub fn tree(&self) -> TreeKind {
        self.tree
    }

    /// Add a node under a fresh id.
    pub fn add_node(&mut self, node: impl Node + 'static) -> NodeId {
        self.add_shared_node(Arc::new(node))
    }

    /// Add an already shared node under a fresh id.
    pub fn add_shared_node(&mut self, node: Arc<dyn Node>) -> NodeId {
        let id = self.next_id();
        self.nodes.insert(id, node);
        id
    }

    /// Add a node under an explicit id.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNode`] if the id is taken.
    pub fn insert_node(&mut self, id: NodeId, node: Arc<dyn Node>) -> Result<(), GraphError> {
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        self.nodes.insert(id, node);
        Ok(())
    }

    fn next_id(&self) -> NodeId {
        NodeId(self.nodes.keys().next_back().map_or(1, |id| id.0 + 1))
    }

    /// Look up a node definition.
    pub fn node(&self, id: NodeId) -> Option<&Arc<dyn Node>> {
        self.nodes.get(&id)
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Arc<dyn Node>)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Add an edge. Endpoints are checked by validation, not here.
    pub fn connect(&mut self, source: Endpoint, target: Endpoint) {
        self.edges.push(Edge { source, target });
    }

    /// Connect `source` to the next free slot of a list input.
    pub fn connect_append(&mut self, source: Endpoint, node: NodeId, port: &str) -> usize {
        let index = self
            .edges_into(node, port)
            .filter_map(|e| e.target.index)
            .max()
            .map_or(0, |max| max + 1);
        self.connect(source, Endpoint::at(node, port, index));
        index
    }

    /// Edges ending at `node.port`.
    pub fn edges_into<'a>(&'a self, node: NodeId, port: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.target.is(node, port))
    }

    /// Edges leaving `node.port`.
    pub fn edges_from<'a>(&'a self, node: NodeId, port: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.source.is(node, port))
    }

    /// Returns `true` if `node` already went through amplification.
    pub fn is_amplified(&self, node: NodeId) -> bool {
        self.amplified.contains(&node)
    }

    pub(crate) fn mark_amplified(&mut self, node: NodeId) {
        self.amplified.insert(node);
    }

    #[cfg(test)]
    pub(crate) fn clear_amplified(&mut self) {
        self.amplified.clear();
    }

    /// Route the edge `source -> consumer` through a newly inserted adapter
    /// node.
    ///
    /// The edge is located by its source endpoint and the consumer's node and
    /// port. It keeps its source and is redirected to `adapter.adapter_input`;
    /// a new edge connects `adapter.adapter_output` to the original
    /// destination. Returns the adapter's id, or `None` if no such edge
    /// exists.
    pub fn intercept_connection(
        &mut self,
        source: &Endpoint,
        consumer: &Endpoint,
        adapter: Arc<dyn Node>,
        adapter_input: &str,
        adapter_output: &str,
    ) -> Option<NodeId> {
        let position = self
            .edges
            .iter()
            .position(|e| e.source == *source && e.target.is(consumer.node, &consumer.port))?;

        let adapter_id = self.add_shared_node(adapter);
        let original_target = std::mem::replace(
            &mut self.edges[position].target,
            Endpoint::new(adapter_id, adapter_input),
        );
        self.connect(Endpoint::new(adapter_id, adapter_output), original_target);
        Some(adapter_id)
    }

    /// Clone every edge feeding `from_node.from_port` onto
    /// `to_node.to_port`, keeping sources and list slots. Returns how many
    /// edges were cloned.
    pub fn duplicate_input_connections(
        &mut self,
        from_node: NodeId,
        from_port: &str,
        to_node: NodeId,
        to_port: &str,
    ) -> usize {
        let clones: Vec<Edge> = self
            .edges_into(from_node, from_port)
            .map(|e| Edge {
                source: e.source.clone(),
                target: Endpoint {
                    node: to_node,
                    port: to_port.to_string(),
                    index: e.target.index,
                },
            })
            .collect();
        let count = clones.len();
        self.edges.extend(clones);
        count
    }

    /// Validate, amplify and freeze the graph.
    ///
    /// # Errors
    ///
    /// Any configuration or semantic error aborts finalization.
    pub fn finalize(self) -> Result<FinalizedGraph, GraphError> {
        validate(&self)?;
        let graph = amplify(self)?;
        validate(&graph)?;
        Ok(FinalizedGraph::index(graph))
    }
}

/// Read-only graph ready for evaluation.
#[derive(Debug)]
pub struct FinalizedGraph {
    graph: Graph,
    inputs: HashMap<NodeId, Vec<(String, Vec<Edge>)>>,
    outputs: Vec<(String, NodeId)>,
}

impl FinalizedGraph {
    fn index(graph: Graph) -> Self {
        let mut inputs: HashMap<NodeId, Vec<(String, Vec<Edge>)>> = HashMap::new();
        for edge in &graph.edges {
            let ports = inputs.entry(edge.target.node).or_default();
            match ports.iter_mut().find(|(port, _)| *port == edge.target.port) {
                Some((_, edges)) => edges.push(edge.clone()),
                None => ports.push((edge.target.port.clone(), vec![edge.clone()])),
            }
        }
        for ports in inputs.values_mut() {
            for (_, edges) in ports.iter_mut() {
                edges.sort_by_key(|e| e.target.index);
            }
        }

        let outputs = graph
            .nodes()
            .filter_map(|(id, node)| node.output_name().map(|name| (name.to_string(), id)))
            .collect();

        Self {
            graph,
            inputs,
            outputs,
        }
    }

    /// The underlying graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Look up a node definition.
    pub fn node(&self, id: NodeId) -> Option<&Arc<dyn Node>> {
        self.graph.node(id)
    }

    /// Edges feeding `node.port`, ordered by list slot.
    pub fn input_edges(&self, node: NodeId, port: &str) -> &[Edge] {
        self.inputs
            .get(&node)
            .and_then(|ports| ports.iter().find(|(p, _)| p == port))
            .map_or(&[], |(_, edges)| edges.as_slice())
    }

    /// `(name, node)` of every output node.
    pub fn output_nodes(&self) -> &[(String, NodeId)] {
        &self.outputs
    }

    /// Kind of tree this graph describes.
    pub fn tree(&self) -> TreeKind {
        self.graph.tree()
    }
}

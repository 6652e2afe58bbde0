//! Error types for graph finalization and branch evaluation.

use crate::graph::NodeId;

/// Errors detected while building, validating, or amplifying a graph.
///
/// Any of these aborts finalization: a graph that produced one is never
/// evaluated.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Two nodes were declared with the same id.
    #[error("duplicate node id {0}")]
    DuplicateNode(NodeId),

    /// An edge references a node that does not exist.
    #[error("edge references missing node {node}")]
    DanglingEdge {
        /// The id the edge points at.
        node: NodeId,
    },

    /// An edge references a port the node does not declare (or uses an
    /// input as an output and vice versa).
    #[error("node {node} ({node_type}) has no {direction} port named `{port}`")]
    UnknownPort {
        /// Node carrying the edge endpoint.
        node: NodeId,
        /// Type name of that node.
        node_type: &'static str,
        /// Port name used by the edge.
        port: String,
        /// `"input"` or `"output"`.
        direction: &'static str,
    },

    /// The value types on both sides of an edge are incompatible.
    #[error("type mismatch on edge {source_node}.{source_port} -> {target_node}.{target_port}: {reason}")]
    TypeMismatch {
        /// Producing node.
        source_node: NodeId,
        /// Producing port.
        source_port: String,
        /// Consuming node.
        target_node: NodeId,
        /// Consuming port.
        target_port: String,
        /// Human readable description of the mismatch.
        reason: &'static str,
    },

    /// A single-valued input (or list slot) has more than one incoming edge.
    #[error("input {node}.{port} has more than one connection")]
    MultipleConnections {
        /// Consuming node.
        node: NodeId,
        /// Consuming port.
        port: String,
    },

    /// A positional list input is missing an index (e.g. slots 0 and 2 but not 1).
    #[error("list input {node}.{port} has no connection at index {index}")]
    ListGap {
        /// Consuming node.
        node: NodeId,
        /// Consuming port.
        port: String,
        /// First missing index.
        index: usize,
    },

    /// A required input port has no incoming edge.
    #[error("required input {node}.{port} is not connected")]
    MissingInput {
        /// Node with the unconnected port.
        node: NodeId,
        /// The port name.
        port: &'static str,
    },

    /// The node type may not appear in this kind of graph.
    #[error("node {node} ({node_type}) is not allowed in a {tree:?} graph")]
    DisallowedNode {
        /// Offending node.
        node: NodeId,
        /// Its type name.
        node_type: &'static str,
        /// The graph's tree kind.
        tree: crate::graph::TreeKind,
    },

    /// The graph contains a cycle through the listed nodes.
    #[error("graph contains a cycle through nodes {nodes:?}")]
    Cycle {
        /// Nodes that could not be ordered.
        nodes: Vec<NodeId>,
    },

    /// A node-specific validation rule failed.
    #[error("node {node} ({node_type}): {message}")]
    Semantic {
        /// Offending node.
        node: NodeId,
        /// Its type name.
        node_type: &'static str,
        /// What is wrong.
        message: String,
    },

    /// The graph has no output node and would compute nothing.
    #[error("graph has no output nodes")]
    NoOutputs,

    /// Two output nodes publish under the same name.
    #[error("output name `{0}` is used by more than one node")]
    DuplicateOutput(String),

    /// Amplification kept injecting nodes without reaching a fixed point.
    #[error("amplification did not reach a fixed point after {0} passes")]
    AmplificationDiverged(usize),

    /// The graph description could not be parsed.
    #[error("failed to parse graph description: {0}")]
    Parse(String),
}

/// Errors that abort the evaluation of a single branch.
///
/// The graph and any other in-flight branch are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// A full sweep made no progress; the listed nodes never became ready.
    #[error("evaluation stalled, no progress on nodes {stalled:?}")]
    Deadlock {
        /// `(id, type name)` of every node that was still unfinished.
        stalled: Vec<(NodeId, &'static str)>,
    },

    /// A node asked for a required input that has no connection.
    #[error("node {node} requires input `{port}` but it is not connected")]
    MissingInput {
        /// Requesting node.
        node: NodeId,
        /// The port name.
        port: String,
    },

    /// An edge selects a list element the upstream node did not produce.
    #[error("node {node} output `{port}` has no element {index}")]
    ListIndexOutOfRange {
        /// Upstream node.
        node: NodeId,
        /// Upstream port.
        port: String,
        /// Requested element.
        index: usize,
    },

    /// The upstream value on an edge has the wrong shape.
    #[error("node {node} output `{port}` produced a value of the wrong type")]
    UnexpectedValue {
        /// Upstream node.
        node: NodeId,
        /// Upstream port.
        port: String,
    },

    /// The terrain configuration cannot be evaluated.
    #[error("invalid terrain configuration: {0}")]
    InvalidTerrain(&'static str),

    /// A kernel feeding the listed outputs panicked; their buffers hold
    /// unspecified data.
    #[error("a kernel panicked while computing outputs {outputs:?}")]
    KernelPanicked {
        /// Names of the affected outputs.
        outputs: Vec<String>,
    },

    /// The worker pool could not be started.
    #[error("failed to start scheduler worker: {0}")]
    Scheduler(#[source] std::io::Error),
}

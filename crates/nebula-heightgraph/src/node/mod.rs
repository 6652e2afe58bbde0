//! Node definitions, per-branch node instances and the port plumbing between
//! them.
//!
//! A [`Node`] is the shared, immutable definition stored in the graph: its
//! parameters and a static port table. Every branch evaluation calls
//! [`Node::instantiate`] to get a fresh [`NodeInstance`], a small state
//! machine driven by the evaluator:
//!
//! 1. [`NodeInstance::set_input_values`] pulls upstream values through
//!    [`NodeInputs`]. Asking for a value that is not published yet demands the
//!    upstream node and yields [`Poll::Pending`]; the instance returns
//!    `Ok(false)` and is polled again on a later sweep.
//! 2. [`NodeInstance::process`] allocates and schedules kernels. It returns
//!    `Ok(true)` once every output is scheduled (not necessarily written).
//! 3. [`NodeInstance::cache_output_values`] publishes the outputs.

mod cache;

use std::fmt::Debug;
use std::task::Poll;

use crate::branch::BranchData;
use crate::error::{EvalError, GraphError};
use crate::graph::{Edge, Endpoint, FinalizedGraph, Graph, NodeId, TreeKind};
use crate::height_data::HeightData;

pub use cache::OutputCache;

/// Direction of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortDirection {
    /// Consumes a value.
    Input,
    /// Produces a value.
    Output,
}

/// Value shape carried by a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortType {
    /// A single [`HeightData`].
    Height,
    /// An ordered list of [`HeightData`].
    HeightList,
}

/// Static description of one port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortDescriptor {
    /// Port name, unique per direction within a node type.
    pub name: &'static str,
    /// Input or output.
    pub direction: PortDirection,
    /// Value shape.
    pub ty: PortType,
    /// Inputs only: validation fails when nothing is connected.
    pub required: bool,
}

impl PortDescriptor {
    /// A required single-valued input.
    pub const fn input(name: &'static str) -> Self {
        Self {
            name,
            direction: PortDirection::Input,
            ty: PortType::Height,
            required: true,
        }
    }

    /// An optional single-valued input.
    pub const fn optional_input(name: &'static str) -> Self {
        Self {
            name,
            direction: PortDirection::Input,
            ty: PortType::Height,
            required: false,
        }
    }

    /// A list input.
    pub const fn list_input(name: &'static str, required: bool) -> Self {
        Self {
            name,
            direction: PortDirection::Input,
            ty: PortType::HeightList,
            required,
        }
    }

    /// A single-valued output.
    pub const fn output(name: &'static str) -> Self {
        Self {
            name,
            direction: PortDirection::Output,
            ty: PortType::Height,
            required: false,
        }
    }

    /// A list output.
    pub const fn list_output(name: &'static str) -> Self {
        Self {
            name,
            direction: PortDirection::Output,
            ty: PortType::HeightList,
            required: false,
        }
    }
}

/// Look up a port by name and direction.
pub fn find_port(
    ports: &'static [PortDescriptor],
    name: &str,
    direction: PortDirection,
) -> Option<&'static PortDescriptor> {
    ports
        .iter()
        .find(|p| p.direction == direction && p.name == name)
}

/// A value published on an output port.
#[derive(Clone, Debug)]
pub enum PortValue {
    /// Single buffer.
    Height(HeightData),
    /// Ordered buffers.
    List(Vec<HeightData>),
}

impl PortValue {
    /// The single buffer, if this is one.
    pub fn as_height(&self) -> Option<&HeightData> {
        match self {
            PortValue::Height(data) => Some(data),
            PortValue::List(_) => None,
        }
    }

    /// The buffer list, if this is one.
    pub fn as_list(&self) -> Option<&[HeightData]> {
        match self {
            PortValue::Height(_) => None,
            PortValue::List(list) => Some(list),
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Shared definition of a node: parameters and ports.
pub trait Node: Debug + Send + Sync {
    /// Type name used in errors and logs.
    fn type_name(&self) -> &'static str;

    /// Static port table.
    fn ports(&self) -> &'static [PortDescriptor];

    /// Whether this node type may appear in a graph of `tree` kind.
    fn allowed_in(&self, _tree: TreeKind) -> bool {
        true
    }

    /// Node-specific validation run after the structural checks.
    fn validate(&self, _id: NodeId, _graph: &Graph) -> Result<(), GraphError> {
        Ok(())
    }

    /// Inject helper nodes or edges. Must leave an already rewritten
    /// topology untouched.
    fn amplify(&self, _id: NodeId, _graph: &mut Graph) -> Result<(), GraphError> {
        Ok(())
    }

    /// Name under which this node publishes a graph output.
    fn output_name(&self) -> Option<&str> {
        None
    }

    /// Fresh per-branch state machine.
    fn instantiate(&self, id: NodeId) -> Box<dyn NodeInstance + '_>;
}

/// Per-branch evaluation state of one node.
pub trait NodeInstance: Send {
    /// Gather upstream values. Returns `Ok(false)` while some are missing.
    ///
    /// Must have no side effects other than demanding upstream nodes, so it
    /// can be re-entered on every sweep.
    fn set_input_values(&mut self, inputs: &mut NodeInputs<'_>) -> Result<bool, EvalError>;

    /// Allocate and schedule. Returns `Ok(true)` once every output is
    /// scheduled.
    fn process(&mut self, branch: &BranchData<'_>) -> Result<bool, EvalError>;

    /// Publish outputs. Called once, right after `process` returned `true`.
    fn cache_output_values(&mut self, outputs: &mut NodeOutputs<'_>);

    /// Short label of the current state, for stall reports.
    fn state_name(&self) -> &'static str {
        "pending"
    }
}

// ---------------------------------------------------------------------------
// Input access
// ---------------------------------------------------------------------------

/// Input side of one node during `set_input_values`.
pub struct NodeInputs<'a> {
    node: NodeId,
    graph: &'a FinalizedGraph,
    outputs: &'a OutputCache,
    demanded: &'a mut Vec<NodeId>,
}

impl<'a> NodeInputs<'a> {
    pub(crate) fn new(
        node: NodeId,
        graph: &'a FinalizedGraph,
        outputs: &'a OutputCache,
        demanded: &'a mut Vec<NodeId>,
    ) -> Self {
        Self {
            node,
            graph,
            outputs,
            demanded,
        }
    }

    /// Node being fed.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Edges feeding `port`, ordered by list slot.
    pub fn edges(&self, port: &str) -> &'a [Edge] {
        self.graph.input_edges(self.node, port)
    }

    /// Returns `true` if anything feeds `port`.
    pub fn is_connected(&self, port: &str) -> bool {
        !self.edges(port).is_empty()
    }

    /// Upstream endpoint of a single-valued input.
    pub fn source_of(&self, port: &str) -> Option<&'a Endpoint> {
        self.edges(port).first().map(|e| &e.source)
    }

    fn fetch(&mut self, source: &Endpoint) -> Result<Poll<PortValue>, EvalError> {
        if !self.outputs.is_published(source.node) {
            if !self.demanded.contains(&source.node) {
                self.demanded.push(source.node);
            }
            return Ok(Poll::Pending);
        }
        self.outputs.resolve(source).map(Poll::Ready)
    }

    /// Value of an optional single-valued input; `Ready(None)` when nothing
    /// is connected.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream port publishes the wrong shape.
    pub fn height(&mut self, port: &str) -> Result<Poll<Option<HeightData>>, EvalError> {
        let Some(source) = self.source_of(port) else {
            return Ok(Poll::Ready(None));
        };
        match self.fetch(source)? {
            Poll::Pending => Ok(Poll::Pending),
            Poll::Ready(PortValue::Height(data)) => Ok(Poll::Ready(Some(data))),
            Poll::Ready(PortValue::List(_)) => Err(EvalError::UnexpectedValue {
                node: source.node,
                port: source.port.clone(),
            }),
        }
    }

    /// Value of a required single-valued input.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::MissingInput`] if nothing is connected.
    pub fn required_height(&mut self, port: &str) -> Result<Poll<HeightData>, EvalError> {
        match self.height(port)? {
            Poll::Pending => Ok(Poll::Pending),
            Poll::Ready(Some(data)) => Ok(Poll::Ready(data)),
            Poll::Ready(None) => Err(EvalError::MissingInput {
                node: self.node,
                port: port.to_string(),
            }),
        }
    }

    /// Value of a list input, in slot order; empty when nothing is connected.
    ///
    /// Every missing upstream is demanded in the same call.
    ///
    /// # Errors
    ///
    /// Returns an error if an upstream port publishes the wrong shape.
    pub fn list(&mut self, port: &str) -> Result<Poll<Vec<HeightData>>, EvalError> {
        let edges = self.edges(port);
        let mut values = Vec::with_capacity(edges.len());
        let mut pending = false;
        for edge in edges {
            match self.fetch(&edge.source)? {
                Poll::Pending => pending = true,
                Poll::Ready(PortValue::Height(data)) => values.push(data),
                Poll::Ready(PortValue::List(list)) => values.extend(list),
            }
        }
        if pending {
            Ok(Poll::Pending)
        } else {
            Ok(Poll::Ready(values))
        }
    }
}

/// Output side of one node during `cache_output_values`.
pub struct NodeOutputs<'a> {
    node: NodeId,
    cache: &'a mut OutputCache,
}

impl<'a> NodeOutputs<'a> {
    pub(crate) fn new(node: NodeId, cache: &'a mut OutputCache) -> Self {
        Self { node, cache }
    }

    /// Publish `value` on `port`.
    pub fn publish(&mut self, port: &'static str, value: PortValue) {
        self.cache.publish(self.node, port, value);
    }

    /// Publish a single buffer on `port`.
    pub fn publish_height(&mut self, port: &'static str, data: HeightData) {
        self.publish(port, PortValue::Height(data));
    }

    /// Publish a buffer list on `port`.
    pub fn publish_list(&mut self, port: &'static str, list: Vec<HeightData>) {
        self.publish(port, PortValue::List(list));
    }
}

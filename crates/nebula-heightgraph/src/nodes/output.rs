//! Graph outputs.

use std::task::Poll;

use serde::{Deserialize, Serialize};

use crate::branch::BranchData;
use crate::error::{EvalError, GraphError};
use crate::graph::{Graph, NodeId};
use crate::height_data::HeightData;
use crate::node::{Node, NodeInputs, NodeInstance, NodeOutputs, PortDescriptor};

/// Cache key under which output nodes publish their result. It is not a
/// declared port, so nothing can connect to it.
pub const RESULT_PORT: &str = "Result";

/// Copy `data` into a fresh region at branch resolution.
pub(crate) fn copy_into(branch: &BranchData<'_>, data: &HeightData) -> HeightData {
    let source = data.view.clone();
    let resolution = branch.resolution();
    branch.schedule_kernel(&[data], data.range, move |i| source.sample(i, resolution))
}

/// `data` itself when it already has branch resolution, else a resampled copy.
pub(crate) fn at_branch_resolution(branch: &BranchData<'_>, data: HeightData) -> HeightData {
    if data.resolution() == branch.resolution() {
        data
    } else {
        copy_into(branch, &data)
    }
}

fn check_name(id: NodeId, node_type: &'static str, name: &str) -> Result<(), GraphError> {
    if name.trim().is_empty() {
        return Err(GraphError::Semantic {
            node: id,
            node_type,
            message: "output name must not be empty".to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Height output
// ---------------------------------------------------------------------------

/// Publishes a single buffer under a name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeightOutputNode {
    /// Output name, unique within the graph.
    pub name: String,
}

impl HeightOutputNode {
    /// Output named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Progress of an output node; `T` is a buffer or a list of them.
enum OutputState<T> {
    AwaitingInput,
    Ready(T),
    Resolved(T),
    Published,
}

impl<T> OutputState<T> {
    /// Move a gathered input through `resolve`. Returns `true` once resolved.
    fn resolve(&mut self, resolve: impl FnOnce(T) -> T) -> bool {
        match std::mem::replace(self, Self::Published) {
            Self::Ready(input) => {
                *self = Self::Resolved(resolve(input));
                true
            }
            other => {
                let resolved = matches!(other, Self::Resolved(_));
                *self = other;
                resolved
            }
        }
    }

    fn take_resolved(&mut self) -> Option<T> {
        match std::mem::replace(self, Self::Published) {
            Self::Resolved(value) => Some(value),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::AwaitingInput => "awaiting-input",
            Self::Ready(_) => "ready",
            Self::Resolved(_) => "resolved",
            Self::Published => "published",
        }
    }
}

struct HeightOutputInstance {
    state: OutputState<HeightData>,
}

impl NodeInstance for HeightOutputInstance {
    fn set_input_values(&mut self, inputs: &mut NodeInputs<'_>) -> Result<bool, EvalError> {
        if matches!(self.state, OutputState::AwaitingInput) {
            match inputs.required_height("Input")? {
                Poll::Ready(data) => self.state = OutputState::Ready(data),
                Poll::Pending => return Ok(false),
            }
        }
        Ok(true)
    }

    fn process(&mut self, branch: &BranchData<'_>) -> Result<bool, EvalError> {
        Ok(self
            .state
            .resolve(|input| at_branch_resolution(branch, input)))
    }

    fn cache_output_values(&mut self, outputs: &mut NodeOutputs<'_>) {
        if let Some(output) = self.state.take_resolved() {
            outputs.publish_height(RESULT_PORT, output);
        }
    }

    fn state_name(&self) -> &'static str {
        self.state.name()
    }
}

impl Node for HeightOutputNode {
    fn type_name(&self) -> &'static str {
        "HeightOutput"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        const PORTS: &[PortDescriptor] = &[PortDescriptor::input("Input")];
        PORTS
    }

    fn validate(&self, id: NodeId, _graph: &Graph) -> Result<(), GraphError> {
        check_name(id, self.type_name(), &self.name)
    }

    fn output_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(HeightOutputInstance {
            state: OutputState::AwaitingInput,
        })
    }
}

// ---------------------------------------------------------------------------
// Weight output
// ---------------------------------------------------------------------------

/// Publishes a list of weight buffers under a name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeightOutputNode {
    /// Output name, unique within the graph.
    pub name: String,
}

impl WeightOutputNode {
    /// Output named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

struct WeightOutputInstance {
    state: OutputState<Vec<HeightData>>,
}

impl NodeInstance for WeightOutputInstance {
    fn set_input_values(&mut self, inputs: &mut NodeInputs<'_>) -> Result<bool, EvalError> {
        if matches!(self.state, OutputState::AwaitingInput) {
            match inputs.list("Input")? {
                Poll::Ready(list) => self.state = OutputState::Ready(list),
                Poll::Pending => return Ok(false),
            }
        }
        Ok(true)
    }

    fn process(&mut self, branch: &BranchData<'_>) -> Result<bool, EvalError> {
        Ok(self.state.resolve(|list| {
            list.into_iter()
                .map(|data| at_branch_resolution(branch, data))
                .collect()
        }))
    }

    fn cache_output_values(&mut self, outputs: &mut NodeOutputs<'_>) {
        if let Some(list) = self.state.take_resolved() {
            outputs.publish_list(RESULT_PORT, list);
        }
    }

    fn state_name(&self) -> &'static str {
        self.state.name()
    }
}

impl Node for WeightOutputNode {
    fn type_name(&self) -> &'static str {
        "WeightOutput"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        const PORTS: &[PortDescriptor] = &[PortDescriptor::list_input("Input", true)];
        PORTS
    }

    fn validate(&self, id: NodeId, _graph: &Graph) -> Result<(), GraphError> {
        check_name(id, self.type_name(), &self.name)
    }

    fn output_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(WeightOutputInstance {
            state: OutputState::AwaitingInput,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_state_transitions() {
        let mut state = OutputState::AwaitingInput;
        assert_eq!(state.name(), "awaiting-input");
        assert!(!state.resolve(|v: Vec<u8>| v));
        assert_eq!(state.name(), "awaiting-input");

        state = OutputState::Ready(vec![1]);
        assert_eq!(state.name(), "ready");
        assert!(state.resolve(|mut v| {
            v.push(2);
            v
        }));
        assert_eq!(state.name(), "resolved");
        assert!(state.resolve(|_| unreachable!("resolved twice")));

        assert_eq!(state.take_resolved(), Some(vec![1, 2]));
        assert_eq!(state.name(), "published");
        assert_eq!(state.take_resolved(), None);
    }

    #[test]
    fn test_fresh_instances_await_input() {
        let height = HeightOutputNode::new("h");
        assert_eq!(height.instantiate(NodeId(1)).state_name(), "awaiting-input");
        let weights = WeightOutputNode::new("w");
        assert_eq!(weights.instantiate(NodeId(2)).state_name(), "awaiting-input");
    }
}

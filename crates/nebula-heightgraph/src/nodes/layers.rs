//! Priority compositing of weight layers.

use std::task::Poll;

use serde::{Deserialize, Serialize};

use super::{InputSet, clamp01};
use crate::branch::BranchData;
use crate::error::EvalError;
use crate::graph::NodeId;
use crate::height_data::{HeightData, ValueRange};
use crate::node::{Node, NodeInputs, NodeInstance, NodeOutputs, PortDescriptor};

/// Turn overlapping weights into non-overlapping layer occupancy.
///
/// Layers are composited from the last input to the first. Each takes its
/// clamped weight out of the remainder left by the layers after it:
/// `out_i = c(w_i) * Π_{j>i} (1 - c(w_j))`, so the outputs sum to at most one
/// and the last input wins where it is fully opaque.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct LayersNode;

/// Occupancy of layer `target` given every layer's weight at one sample.
#[inline]
pub(crate) fn layer_occupancy(count: usize, weight: impl Fn(usize) -> f32, target: usize) -> f32 {
    let remainder: f32 = (target + 1..count).map(|j| 1.0 - clamp01(weight(j))).product();
    clamp01(weight(target)) * remainder
}

enum LayersState {
    AwaitingInputs,
    Ready(Vec<HeightData>),
    Scheduled(Vec<HeightData>),
    Published,
}

struct LayersInstance {
    state: LayersState,
}

fn schedule(branch: &BranchData<'_>, weights: &[HeightData]) -> Vec<HeightData> {
    let set = InputSet::new(weights);
    let refs: Vec<&HeightData> = weights.iter().collect();
    let resolution = branch.resolution();
    let count = weights.len();
    weights
        .iter()
        .enumerate()
        .map(|(target, weight)| {
            let set = set.clone();
            let range = ValueRange::new(0.0, clamp01(weight.range.max));
            branch.schedule_kernel(&refs, range, move |i| {
                layer_occupancy(count, |n| set.value(n, i, resolution), target)
            })
        })
        .collect()
}

impl NodeInstance for LayersInstance {
    fn set_input_values(&mut self, inputs: &mut NodeInputs<'_>) -> Result<bool, EvalError> {
        if matches!(self.state, LayersState::AwaitingInputs) {
            match inputs.list("Inputs")? {
                Poll::Ready(list) => self.state = LayersState::Ready(list),
                Poll::Pending => return Ok(false),
            }
        }
        Ok(true)
    }

    fn process(&mut self, branch: &BranchData<'_>) -> Result<bool, EvalError> {
        if let LayersState::Ready(weights) = &self.state {
            self.state = LayersState::Scheduled(schedule(branch, weights));
        }
        Ok(matches!(self.state, LayersState::Scheduled(_)))
    }

    fn cache_output_values(&mut self, outputs: &mut NodeOutputs<'_>) {
        if let LayersState::Scheduled(layers) =
            std::mem::replace(&mut self.state, LayersState::Published)
        {
            outputs.publish_list("Layers", layers);
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            LayersState::AwaitingInputs => "awaiting-inputs",
            LayersState::Ready(_) => "ready",
            LayersState::Scheduled(_) => "scheduled",
            LayersState::Published => "published",
        }
    }
}

impl Node for LayersNode {
    fn type_name(&self) -> &'static str {
        "Layers"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        const PORTS: &[PortDescriptor] = &[
            PortDescriptor::list_input("Inputs", false),
            PortDescriptor::list_output("Layers"),
        ];
        PORTS
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(LayersInstance {
            state: LayersState::AwaitingInputs,
        })
    }
}

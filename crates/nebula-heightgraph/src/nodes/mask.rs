//! Masked blending toward a fill value.

use std::sync::Arc;
use std::task::Poll;

use serde::{Deserialize, Serialize};

use super::{Pointwise, UnaryInstance, clamp01};
use crate::branch::BranchData;
use crate::error::{EvalError, GraphError};
use crate::graph::{Endpoint, Graph, NodeId};
use crate::height_data::{HeightData, ValueRange};
use crate::node::{Node, NodeInputs, NodeInstance, NodeOutputs, PortDescriptor};

/// Value the output approaches where the mask is zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtZero {
    /// Zero.
    #[default]
    Zero,
    /// The input's declared minimum.
    Minimum,
    /// The input's declared maximum.
    Maximum,
}

impl AtZero {
    fn value(self, input: ValueRange) -> f32 {
        match self {
            AtZero::Zero => 0.0,
            AtZero::Minimum => input.min,
            AtZero::Maximum => input.max,
        }
    }
}

/// Blend `Input` toward the at-zero value: `z + (v - z) * mask`.
///
/// The mask is routed through a [`MaskValidatorNode`] during amplification.
/// When the validated mask's declared maximum is not positive it carries no
/// data and the output is a constant fill; in [`AtZero::Zero`] mode the
/// input is not evaluated at all.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyMaskNode {
    /// Fill value where the mask is zero.
    pub at_zero: AtZero,
}

enum MaskState {
    AwaitingMask,
    AwaitingInput { mask: HeightData },
    AwaitingFillRange,
    Blend { input: HeightData, mask: HeightData },
    Fill { value: f32 },
    Scheduled(HeightData),
    Published,
}

struct ApplyMaskInstance {
    at_zero: AtZero,
    state: MaskState,
}

impl NodeInstance for ApplyMaskInstance {
    fn set_input_values(&mut self, inputs: &mut NodeInputs<'_>) -> Result<bool, EvalError> {
        loop {
            match &self.state {
                MaskState::AwaitingMask => match inputs.required_height("Mask")? {
                    Poll::Pending => return Ok(false),
                    Poll::Ready(mask) if mask.range.max <= 0.0 => {
                        tracing::trace!(node = %inputs.node(), "mask carries no data");
                        self.state = match self.at_zero {
                            AtZero::Zero => MaskState::Fill { value: 0.0 },
                            AtZero::Minimum | AtZero::Maximum => MaskState::AwaitingFillRange,
                        };
                    }
                    Poll::Ready(mask) => self.state = MaskState::AwaitingInput { mask },
                },
                MaskState::AwaitingInput { mask } => match inputs.required_height("Input")? {
                    Poll::Pending => return Ok(false),
                    Poll::Ready(input) => {
                        self.state = MaskState::Blend {
                            input,
                            mask: mask.clone(),
                        };
                    }
                },
                MaskState::AwaitingFillRange => match inputs.required_height("Input")? {
                    Poll::Pending => return Ok(false),
                    // Only the declared range is read.
                    Poll::Ready(input) => {
                        self.state = MaskState::Fill {
                            value: self.at_zero.value(input.range),
                        };
                    }
                },
                _ => return Ok(true),
            }
        }
    }

    fn process(&mut self, branch: &BranchData<'_>) -> Result<bool, EvalError> {
        let output = match &self.state {
            MaskState::Fill { value } => branch.constant(*value, ValueRange::point(*value)),
            MaskState::Blend { input, mask } => {
                let z = self.at_zero.value(input.range);
                let values = input.view.clone();
                let weights = mask.view.clone();
                let resolution = branch.resolution();
                branch.schedule_kernel(&[input, mask], input.range.including(z), move |i| {
                    let m = clamp01(weights.sample(i, resolution));
                    z + (values.sample(i, resolution) - z) * m
                })
            }
            MaskState::Scheduled(_) => return Ok(true),
            _ => return Ok(false),
        };
        self.state = MaskState::Scheduled(output);
        Ok(true)
    }

    fn cache_output_values(&mut self, outputs: &mut NodeOutputs<'_>) {
        if let MaskState::Scheduled(output) = std::mem::replace(&mut self.state, MaskState::Published)
        {
            outputs.publish_height("Output", output);
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            MaskState::AwaitingMask => "awaiting-mask",
            MaskState::AwaitingInput { .. } => "awaiting-input",
            MaskState::AwaitingFillRange => "awaiting-fill-range",
            MaskState::Blend { .. } => "blend",
            MaskState::Fill { .. } => "fill",
            MaskState::Scheduled(_) => "scheduled",
            MaskState::Published => "published",
        }
    }
}

impl Node for ApplyMaskNode {
    fn type_name(&self) -> &'static str {
        "ApplyMask"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        const PORTS: &[PortDescriptor] = &[
            PortDescriptor::input("Input"),
            PortDescriptor::input("Mask"),
            PortDescriptor::output("Output"),
        ];
        PORTS
    }

    fn amplify(&self, id: NodeId, graph: &mut Graph) -> Result<(), GraphError> {
        let Some(edge) = graph.edges_into(id, "Mask").next() else {
            return Ok(());
        };
        let validated = graph
            .node(edge.source.node)
            .is_some_and(|n| n.type_name() == MaskValidatorNode.type_name());
        if validated {
            return Ok(());
        }
        let source = edge.source.clone();
        graph.intercept_connection(
            &source,
            &Endpoint::new(id, "Mask"),
            Arc::new(MaskValidatorNode),
            "Input",
            "Output",
        );
        Ok(())
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(ApplyMaskInstance {
            at_zero: self.at_zero,
            state: MaskState::AwaitingMask,
        })
    }
}

// ---------------------------------------------------------------------------
// Mask validator
// ---------------------------------------------------------------------------

/// Clamp a mask into `[0, 1]`. Injected in front of every Apply-Mask.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct MaskValidatorNode;

impl Node for MaskValidatorNode {
    fn type_name(&self) -> &'static str {
        "MaskValidator"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        const PORTS: &[PortDescriptor] = &[
            PortDescriptor::input("Input"),
            PortDescriptor::output("Output"),
        ];
        PORTS
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(UnaryInstance::new("Input", |_branch, input: ValueRange| {
            Pointwise::new(
                ValueRange::new(clamp01(input.min), clamp01(input.max)),
                clamp01,
            )
        }))
    }
}

//! Operator kernel library.
//!
//! Every node computes its output [`ValueRange`] analytically from its
//! inputs' declared ranges and schedules a kernel that reads its inputs
//! through the index remapper, so inputs of any resolution can be mixed.

mod biome;
mod clamp;
mod combine;
mod curve;
mod divide;
mod fold;
mod interpolate;
mod layers;
mod mask;
mod move_origin;
mod output;
mod range;
mod scale;
mod sources;

use std::sync::Arc;
use std::task::Poll;

use serde::{Deserialize, Serialize};

use crate::branch::BranchData;
use crate::error::EvalError;
use crate::height_data::{HeightData, ValueRange};
use crate::node::{Node, NodeInputs, NodeInstance, NodeOutputs};

pub use biome::{BiomeCombineMode, BiomeCombineNode};
pub use clamp::ClampNode;
pub use combine::{CombineNode, CombineOperation};
pub use curve::{CurveNode, CurveTable};
pub use divide::DivideNode;
pub use fold::{FoldDirection, FoldNode};
pub use interpolate::InterpolateNode;
pub use layers::LayersNode;
pub use mask::{ApplyMaskNode, AtZero, MaskValidatorNode};
pub use move_origin::{GridScaleNode, MoveOriginNode};
pub use output::{HeightOutputNode, RESULT_PORT, WeightOutputNode};
pub use range::{NewRangeNode, NormalizeNode};
pub use scale::ScaleNode;
pub use sources::{ConstantNode, GradientAxis, GradientNode, NoiseNode};

/// Serializable node type plus parameters, as found in a graph description.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum NodeKind {
    /// Uniform value.
    Constant(ConstantNode),
    /// Repeating ramp along a world axis.
    Gradient(GradientNode),
    /// Fractal simplex noise.
    Noise(NoiseNode),
    /// N-ary fold with optional per-input weights.
    Combine(CombineNode),
    /// Clamp to fixed bounds.
    Clamp(ClampNode),
    /// Guarded division.
    Divide(DivideNode),
    /// Lerp between two inputs.
    Interpolate,
    /// Sampled response curve.
    Curve(CurveNode),
    /// Reflection about a line.
    Fold(FoldNode),
    /// Remap into fixed bounds.
    NewRange(NewRangeNode),
    /// Remap into `[0, 1]`.
    Normalize,
    /// Value and spatial scaling.
    Scale(ScaleNode),
    /// Evaluate upstream with scaled coordinates.
    GridScale(GridScaleNode),
    /// Blend toward an at-zero value by a mask.
    ApplyMask(ApplyMaskNode),
    /// Clamp a mask into `[0, 1]`.
    MaskValidator,
    /// Priority compositing of weights.
    Layers,
    /// Evaluate upstream with a shifted origin.
    MoveOrigin(MoveOriginNode),
    /// Weighted combination of biome heights.
    BiomeCombine(BiomeCombineNode),
    /// Named height output.
    HeightOutput(HeightOutputNode),
    /// Named weight list output.
    WeightOutput(WeightOutputNode),
}

impl NodeKind {
    /// Turn the description into a shared node definition.
    pub fn into_node(self) -> Arc<dyn Node> {
        match self {
            NodeKind::Constant(node) => Arc::new(node),
            NodeKind::Gradient(node) => Arc::new(node),
            NodeKind::Noise(node) => Arc::new(node),
            NodeKind::Combine(node) => Arc::new(node),
            NodeKind::Clamp(node) => Arc::new(node),
            NodeKind::Divide(node) => Arc::new(node),
            NodeKind::Interpolate => Arc::new(InterpolateNode),
            NodeKind::Curve(node) => Arc::new(node),
            NodeKind::Fold(node) => Arc::new(node),
            NodeKind::NewRange(node) => Arc::new(node),
            NodeKind::Normalize => Arc::new(NormalizeNode),
            NodeKind::Scale(node) => Arc::new(node),
            NodeKind::GridScale(node) => Arc::new(node),
            NodeKind::ApplyMask(node) => Arc::new(node),
            NodeKind::MaskValidator => Arc::new(MaskValidatorNode),
            NodeKind::Layers => Arc::new(LayersNode),
            NodeKind::MoveOrigin(node) => Arc::new(node),
            NodeKind::BiomeCombine(node) => Arc::new(node),
            NodeKind::HeightOutput(node) => Arc::new(node),
            NodeKind::WeightOutput(node) => Arc::new(node),
        }
    }
}

/// `clamp(v, 0, 1)`.
#[inline]
pub(crate) fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Result of planning a pointwise node: the output bound and the per-sample
/// map.
pub(crate) struct Pointwise {
    pub range: ValueRange,
    pub map: Box<dyn Fn(f32) -> f32 + Send + Sync>,
}

impl Pointwise {
    pub fn new(range: ValueRange, map: impl Fn(f32) -> f32 + Send + Sync + 'static) -> Self {
        Self {
            range,
            map: Box::new(map),
        }
    }
}

enum UnaryState {
    AwaitingInput,
    Ready(HeightData),
    Scheduled(HeightData),
    Published,
}

/// Instance shared by single-input pointwise nodes. `plan` sees the branch
/// and the input's declared range.
pub(crate) struct UnaryInstance<F> {
    port: &'static str,
    plan: F,
    state: UnaryState,
}

impl<F> UnaryInstance<F> {
    pub fn new(port: &'static str, plan: F) -> Self
    where
        F: Fn(&BranchData<'_>, ValueRange) -> Pointwise + Send,
    {
        Self {
            port,
            plan,
            state: UnaryState::AwaitingInput,
        }
    }
}

impl<F> NodeInstance for UnaryInstance<F>
where
    F: Fn(&BranchData<'_>, ValueRange) -> Pointwise + Send,
{
    fn set_input_values(&mut self, inputs: &mut NodeInputs<'_>) -> Result<bool, EvalError> {
        if !matches!(self.state, UnaryState::AwaitingInput) {
            return Ok(true);
        }
        match inputs.required_height(self.port)? {
            Poll::Ready(input) => {
                self.state = UnaryState::Ready(input);
                Ok(true)
            }
            Poll::Pending => Ok(false),
        }
    }

    fn process(&mut self, branch: &BranchData<'_>) -> Result<bool, EvalError> {
        let UnaryState::Ready(input) = &self.state else {
            return Ok(matches!(self.state, UnaryState::Scheduled(_)));
        };
        let Pointwise { range, map } = (self.plan)(branch, input.range);
        let source = input.view.clone();
        let resolution = branch.resolution();
        let output = branch.schedule_kernel(&[input], range, move |i| {
            map(source.sample(i, resolution))
        });
        self.state = UnaryState::Scheduled(output);
        Ok(true)
    }

    fn cache_output_values(&mut self, outputs: &mut NodeOutputs<'_>) {
        if let UnaryState::Scheduled(output) =
            std::mem::replace(&mut self.state, UnaryState::Published)
        {
            outputs.publish_height("Output", output);
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            UnaryState::AwaitingInput => "awaiting-input",
            UnaryState::Ready(_) => "ready",
            UnaryState::Scheduled(_) => "scheduled",
            UnaryState::Published => "published",
        }
    }
}

enum GatherState {
    Gathering,
    Ready(Vec<HeightData>),
    Scheduled(HeightData),
    Published,
}

/// Instance shared by nodes with a fixed set of required single-valued
/// inputs. Every missing input is demanded in the same sweep; `plan` gets the
/// inputs in `ports` order and schedules the output.
pub(crate) struct GatherInstance<F> {
    ports: &'static [&'static str],
    plan: F,
    state: GatherState,
}

impl<F> GatherInstance<F> {
    pub fn new(ports: &'static [&'static str], plan: F) -> Self
    where
        F: Fn(&BranchData<'_>, &[HeightData]) -> HeightData + Send,
    {
        Self {
            ports,
            plan,
            state: GatherState::Gathering,
        }
    }
}

impl<F> NodeInstance for GatherInstance<F>
where
    F: Fn(&BranchData<'_>, &[HeightData]) -> HeightData + Send,
{
    fn set_input_values(&mut self, inputs: &mut NodeInputs<'_>) -> Result<bool, EvalError> {
        if !matches!(self.state, GatherState::Gathering) {
            return Ok(true);
        }
        let mut values = Vec::with_capacity(self.ports.len());
        let mut pending = false;
        for port in self.ports {
            match inputs.required_height(port)? {
                Poll::Ready(value) => values.push(value),
                Poll::Pending => pending = true,
            }
        }
        if pending {
            return Ok(false);
        }
        self.state = GatherState::Ready(values);
        Ok(true)
    }

    fn process(&mut self, branch: &BranchData<'_>) -> Result<bool, EvalError> {
        if let GatherState::Ready(values) = &self.state {
            self.state = GatherState::Scheduled((self.plan)(branch, values));
        }
        Ok(matches!(self.state, GatherState::Scheduled(_)))
    }

    fn cache_output_values(&mut self, outputs: &mut NodeOutputs<'_>) {
        if let GatherState::Scheduled(output) =
            std::mem::replace(&mut self.state, GatherState::Published)
        {
            outputs.publish_height("Output", output);
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            GatherState::Gathering => "gathering",
            GatherState::Ready(_) => "ready",
            GatherState::Scheduled(_) => "scheduled",
            GatherState::Published => "published",
        }
    }
}

/// Views of a list of inputs, captured by kernels.
#[derive(Clone)]
pub(crate) struct InputSet {
    views: Arc<[crate::arena::RegionView]>,
}

impl InputSet {
    pub fn new(inputs: &[HeightData]) -> Self {
        Self {
            views: inputs.iter().map(|d| d.view.clone()).collect(),
        }
    }

    /// Raw value of input `n` at `index` of a `resolution²` grid.
    #[inline]
    pub fn value(&self, n: usize, index: usize, resolution: u32) -> f32 {
        self.views[n].sample(index, resolution)
    }
}

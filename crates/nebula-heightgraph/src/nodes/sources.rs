//! Nodes without inputs: constants and functions of world position.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::branch::BranchData;
use crate::error::{EvalError, GraphError};
use crate::graph::NodeId;
use crate::height_data::{HeightData, ValueRange};
use crate::heightmap::{FbmParams, FbmSampler};
use crate::node::{Node, NodeInputs, NodeInstance, NodeOutputs, PortDescriptor};

const SOURCE_PORTS: &[PortDescriptor] = &[PortDescriptor::output("Output")];

enum SourceState {
    Idle,
    Scheduled(HeightData),
    Published,
}

/// Instance of a source node: one kernel, no inputs.
struct SourceInstance<F> {
    build: F,
    state: SourceState,
}

impl<F> SourceInstance<F> {
    fn new(build: F) -> Self
    where
        F: Fn(&BranchData<'_>) -> HeightData + Send,
    {
        Self {
            build,
            state: SourceState::Idle,
        }
    }
}

impl<F> NodeInstance for SourceInstance<F>
where
    F: Fn(&BranchData<'_>) -> HeightData + Send,
{
    fn set_input_values(&mut self, _inputs: &mut NodeInputs<'_>) -> Result<bool, EvalError> {
        Ok(true)
    }

    fn process(&mut self, branch: &BranchData<'_>) -> Result<bool, EvalError> {
        if matches!(self.state, SourceState::Idle) {
            self.state = SourceState::Scheduled((self.build)(branch));
        }
        Ok(true)
    }

    fn cache_output_values(&mut self, outputs: &mut NodeOutputs<'_>) {
        if let SourceState::Scheduled(output) =
            std::mem::replace(&mut self.state, SourceState::Published)
        {
            outputs.publish_height("Output", output);
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            SourceState::Idle => "idle",
            SourceState::Scheduled(_) => "scheduled",
            SourceState::Published => "published",
        }
    }
}

fn semantic(node: NodeId, node_type: &'static str, message: impl Into<String>) -> GraphError {
    GraphError::Semantic {
        node,
        node_type,
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Constant
// ---------------------------------------------------------------------------

/// A uniform value, stored as a single sample.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstantNode {
    /// The value.
    pub value: f32,
    /// Declared range; defaults to the value itself. Must contain the value.
    pub range: Option<ValueRange>,
}

impl ConstantNode {
    /// A constant whose declared range is the value itself.
    pub fn new(value: f32) -> Self {
        Self { value, range: None }
    }

    /// A constant with an explicit declared range.
    pub fn with_range(value: f32, range: ValueRange) -> Self {
        Self {
            value,
            range: Some(range),
        }
    }

    fn declared_range(&self) -> ValueRange {
        self.range.unwrap_or(ValueRange::point(self.value))
    }
}

impl Node for ConstantNode {
    fn type_name(&self) -> &'static str {
        "Constant"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        SOURCE_PORTS
    }

    fn validate(&self, id: NodeId, _graph: &crate::graph::Graph) -> Result<(), GraphError> {
        if !self.value.is_finite() {
            return Err(semantic(id, self.type_name(), "value must be finite"));
        }
        if let Some(range) = self.range {
            if range.min.is_nan() || range.max.is_nan() || range.min > range.max {
                return Err(semantic(id, self.type_name(), "range min exceeds max"));
            }
            if !range.contains(self.value, 0.0) {
                return Err(semantic(
                    id,
                    self.type_name(),
                    format!(
                        "value {} lies outside its declared range [{}, {}]",
                        self.value, range.min, range.max
                    ),
                ));
            }
        }
        Ok(())
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        let value = self.value;
        let range = self.declared_range();
        Box::new(SourceInstance::new(move |branch: &BranchData<'_>| {
            branch.constant(value, range)
        }))
    }
}

// ---------------------------------------------------------------------------
// Gradient
// ---------------------------------------------------------------------------

/// World axis a gradient runs along.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradientAxis {
    /// World x.
    #[default]
    X,
    /// World y.
    Y,
}

/// Sawtooth ramp `rem_euclid(world[axis], period)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientNode {
    /// Axis the ramp runs along.
    pub axis: GradientAxis,
    /// World distance after which the ramp restarts at zero.
    pub period: f64,
}

impl Default for GradientNode {
    fn default() -> Self {
        Self {
            axis: GradientAxis::X,
            period: 1024.0,
        }
    }
}

impl Node for GradientNode {
    fn type_name(&self) -> &'static str {
        "Gradient"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        SOURCE_PORTS
    }

    fn validate(&self, id: NodeId, _graph: &crate::graph::Graph) -> Result<(), GraphError> {
        if !self.period.is_finite() || self.period <= 0.0 {
            return Err(semantic(id, self.type_name(), "period must be finite and positive"));
        }
        Ok(())
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        let axis = self.axis;
        let period = self.period;
        Box::new(SourceInstance::new(move |branch: &BranchData<'_>| {
            let config = *branch.config();
            let range = ValueRange::new(0.0, period as f32);
            branch.schedule_kernel(&[], range, move |i| {
                let position = config.world_position(i);
                let coordinate = match axis {
                    GradientAxis::X => position.x,
                    GradientAxis::Y => position.y,
                };
                coordinate.rem_euclid(period) as f32
            })
        }))
    }
}

// ---------------------------------------------------------------------------
// Noise
// ---------------------------------------------------------------------------

/// Fractal simplex noise over world position.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseNode {
    /// Added to the branch seed.
    pub seed_offset: u64,
    /// Octave count.
    pub octaves: u32,
    /// Frequency multiplier per octave.
    pub lacunarity: f64,
    /// Amplitude multiplier per octave.
    pub persistence: f64,
    /// Base frequency in cycles per world unit.
    pub frequency: f64,
    /// Amplitude of the first octave.
    pub amplitude: f64,
}

impl Default for NoiseNode {
    fn default() -> Self {
        let fbm = FbmParams::default();
        Self {
            seed_offset: 0,
            octaves: fbm.octaves,
            lacunarity: fbm.lacunarity,
            persistence: fbm.persistence,
            frequency: fbm.frequency,
            amplitude: fbm.amplitude,
        }
    }
}

impl NoiseNode {
    fn params(&self, branch_seed: u64) -> FbmParams {
        FbmParams {
            seed: branch_seed.wrapping_add(self.seed_offset),
            octaves: self.octaves,
            lacunarity: self.lacunarity,
            persistence: self.persistence,
            frequency: self.frequency,
            amplitude: self.amplitude,
        }
    }
}

impl Node for NoiseNode {
    fn type_name(&self) -> &'static str {
        "Noise"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        SOURCE_PORTS
    }

    fn validate(&self, id: NodeId, _graph: &crate::graph::Graph) -> Result<(), GraphError> {
        let finite = [self.lacunarity, self.persistence, self.frequency, self.amplitude]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(semantic(id, self.type_name(), "parameters must be finite"));
        }
        if self.octaves > 32 {
            return Err(semantic(id, self.type_name(), "at most 32 octaves are supported"));
        }
        Ok(())
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(SourceInstance::new(move |branch: &BranchData<'_>| {
            let config = *branch.config();
            let sampler = Arc::new(FbmSampler::new(self.params(config.seed)));
            let bound = sampler.max_amplitude() as f32;
            branch.schedule_kernel(&[], ValueRange::new(-bound, bound), move |i| {
                let position = config.world_position(i);
                sampler.sample(position.x, position.y) as f32
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Endpoint, Graph, TreeKind};
    use crate::nodes::HeightOutputNode;
    use crate::nodes::test_support::{evaluate, height};

    fn single_source(node: impl Node + 'static, resolution: u32) -> Vec<f32> {
        let mut graph = Graph::new(TreeKind::Height);
        let source = graph.add_node(node);
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(source, "Output"), Endpoint::new(out, "Input"));
        height(&evaluate(graph, resolution), "h")
    }

    #[test]
    fn test_fresh_source_is_idle() {
        let node = ConstantNode::new(1.0);
        assert_eq!(node.instantiate(NodeId(1)).state_name(), "idle");
    }

    #[test]
    fn test_constant_fills_tile() {
        let values = single_source(ConstantNode::new(2.5), 4);
        assert_eq!(values, vec![2.5; 16]);
    }

    #[test]
    fn test_constant_outside_range_rejected() {
        let mut graph = Graph::new(TreeKind::Height);
        let c = graph.add_node(ConstantNode::with_range(11.0, ValueRange::new(0.0, 10.0)));
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(c, "Output"), Endpoint::new(out, "Input"));
        assert!(matches!(
            graph.finalize().unwrap_err(),
            GraphError::Semantic { .. }
        ));
    }

    #[test]
    fn test_gradient_follows_world_x() {
        let values = single_source(
            GradientNode {
                axis: GradientAxis::X,
                period: 3.0,
            },
            4,
        );
        // Row 0 at cell size 1: x = 0, 1, 2, 3 -> 0, 1, 2, 0.
        assert_eq!(&values[..4], &[0.0, 1.0, 2.0, 0.0]);
        // Rows repeat along y.
        assert_eq!(&values[4..8], &values[..4]);
    }

    #[test]
    fn test_gradient_along_y() {
        let values = single_source(
            GradientNode {
                axis: GradientAxis::Y,
                period: 100.0,
            },
            3,
        );
        assert_eq!(values, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_noise_stays_within_declared_range() {
        let node = NoiseNode {
            amplitude: 5.0,
            frequency: 0.2,
            ..NoiseNode::default()
        };
        let bound = FbmSampler::new(node.params(0)).max_amplitude() as f32;
        let values = single_source(node, 16);
        assert!(values.iter().all(|v| v.abs() <= bound));
        assert!(values.iter().any(|v| *v != values[0]), "noise should vary");
    }
}

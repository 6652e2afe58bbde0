//! N-ary pointwise combination with optional per-input contribution weights.

use std::sync::Arc;
use std::task::Poll;

use serde::{Deserialize, Serialize};

use super::InputSet;
use crate::branch::BranchData;
use crate::error::{EvalError, GraphError};
use crate::graph::{Graph, NodeId};
use crate::height_data::{HeightData, ValueRange};
use crate::node::{Node, NodeInputs, NodeInstance, NodeOutputs, PortDescriptor};

/// How the inputs are folded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombineOperation {
    /// Sum.
    #[default]
    Add,
    /// Pointwise maximum.
    Max,
    /// Pointwise minimum.
    Min,
    /// Weighted average favouring the locally highest normalised inputs.
    HeightBlend,
    /// Product of the normalised inputs.
    NormalizedMultiply,
}

impl CombineOperation {
    /// Output bound for the given input bounds. `ranges` must not be empty.
    pub fn output_range(self, ranges: &[ValueRange]) -> ValueRange {
        let mins = ranges.iter().map(|r| r.min);
        let maxs = ranges.iter().map(|r| r.max);
        match self {
            CombineOperation::Add => ValueRange::new(mins.sum(), maxs.sum()),
            CombineOperation::Max => ValueRange::new(
                mins.fold(f32::NEG_INFINITY, f32::max),
                maxs.fold(f32::NEG_INFINITY, f32::max),
            ),
            CombineOperation::Min => ValueRange::new(
                mins.fold(f32::INFINITY, f32::min),
                maxs.fold(f32::INFINITY, f32::min),
            ),
            CombineOperation::HeightBlend => ranges[1..]
                .iter()
                .fold(ranges[0], |acc, r| acc.union(r)),
            CombineOperation::NormalizedMultiply => ValueRange::UNIT,
        }
    }
}

/// Fold a list of inputs pointwise.
///
/// With `emit_weights` the node also publishes `Weights`, one `[0, 1]` buffer
/// per input giving that input's share of the result at every sample. The
/// shares sum to one.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CombineNode {
    /// Fold operation.
    pub operation: CombineOperation,
    /// HeightBlend only: how far below the local maximum (in normalised
    /// units) an input still contributes.
    pub blend_factor: f32,
    /// Publish the `Weights` list.
    pub emit_weights: bool,
}

impl Default for CombineNode {
    fn default() -> Self {
        Self {
            operation: CombineOperation::Add,
            blend_factor: 0.1,
            emit_weights: false,
        }
    }
}

impl CombineNode {
    /// A node folding with `operation`, default blend factor, no weights.
    pub fn new(operation: CombineOperation) -> Self {
        Self {
            operation,
            ..Self::default()
        }
    }

    fn blend(&self) -> f32 {
        self.blend_factor.max(f32::EPSILON)
    }

    /// Combined value of one sample. `value(n)` is input `n`'s sample.
    pub(crate) fn combine_at(&self, ranges: &[ValueRange], value: impl Fn(usize) -> f32) -> f32 {
        let count = ranges.len();
        match self.operation {
            CombineOperation::Add => (0..count).map(&value).sum(),
            CombineOperation::Max => (0..count).map(&value).fold(f32::NEG_INFINITY, f32::max),
            CombineOperation::Min => (0..count).map(&value).fold(f32::INFINITY, f32::min),
            CombineOperation::NormalizedMultiply => {
                (0..count).map(|n| ranges[n].normalize(value(n))).product()
            }
            CombineOperation::HeightBlend => {
                let (mut total, mut weighted) = (0.0, 0.0);
                let peak = peak_normalized(ranges, &value);
                for n in 0..count {
                    let v = value(n);
                    let w = blend_weight(ranges[n].normalize(v), peak, self.blend());
                    total += w;
                    weighted += w * v;
                }
                if total > 0.0 { weighted / total } else { value(0) }
            }
        }
    }

    /// Share of input `target` in the combined value of one sample.
    pub(crate) fn weight_at(
        &self,
        ranges: &[ValueRange],
        value: impl Fn(usize) -> f32,
        target: usize,
    ) -> f32 {
        let count = ranges.len();
        let uniform = 1.0 / count as f32;
        match self.operation {
            CombineOperation::Add => {
                let total: f32 = (0..count).map(|n| ranges[n].normalize(value(n))).sum();
                if total > 0.0 {
                    ranges[target].normalize(value(target)) / total
                } else {
                    uniform
                }
            }
            CombineOperation::Max => one_hot(count, &value, target, |a, b| a > b),
            CombineOperation::Min => one_hot(count, &value, target, |a, b| a < b),
            CombineOperation::NormalizedMultiply => uniform,
            CombineOperation::HeightBlend => {
                let peak = peak_normalized(ranges, &value);
                let blend = self.blend();
                let total: f32 = (0..count)
                    .map(|n| blend_weight(ranges[n].normalize(value(n)), peak, blend))
                    .sum();
                if total > 0.0 {
                    blend_weight(ranges[target].normalize(value(target)), peak, blend) / total
                } else {
                    uniform
                }
            }
        }
    }
}

fn peak_normalized(ranges: &[ValueRange], value: &impl Fn(usize) -> f32) -> f32 {
    (0..ranges.len())
        .map(|n| ranges[n].normalize(value(n)))
        .fold(0.0, f32::max)
}

#[inline]
fn blend_weight(normalized: f32, peak: f32, blend: f32) -> f32 {
    (normalized - (peak - blend)).max(0.0)
}

/// `1` if `target` is the first input winning `better`, else `0`.
fn one_hot(
    count: usize,
    value: &impl Fn(usize) -> f32,
    target: usize,
    better: fn(f32, f32) -> bool,
) -> f32 {
    let mut best = 0;
    for n in 1..count {
        if better(value(n), value(best)) {
            best = n;
        }
    }
    if best == target { 1.0 } else { 0.0 }
}

enum CombineState {
    AwaitingInputs,
    Ready(Vec<HeightData>),
    Scheduled {
        output: HeightData,
        weights: Option<Vec<HeightData>>,
    },
    Published,
}

struct CombineInstance<'n> {
    node: &'n CombineNode,
    state: CombineState,
}

impl CombineInstance<'_> {
    fn schedule(&self, branch: &BranchData<'_>, inputs: &[HeightData]) -> CombineState {
        if inputs.is_empty() {
            return CombineState::Scheduled {
                output: branch.constant(0.0, ValueRange::point(0.0)),
                weights: self.node.emit_weights.then(Vec::new),
            };
        }

        let ranges: Arc<[ValueRange]> = inputs.iter().map(|d| d.range).collect();
        let set = InputSet::new(inputs);
        let refs: Vec<&HeightData> = inputs.iter().collect();
        let resolution = branch.resolution();

        let output = {
            let (node, ranges, set) = (self.node.clone(), Arc::clone(&ranges), set.clone());
            branch.schedule_kernel(&refs, self.node.operation.output_range(&ranges), move |i| {
                node.combine_at(&ranges, |n| set.value(n, i, resolution))
            })
        };

        let weights = self.node.emit_weights.then(|| {
            (0..inputs.len())
                .map(|target| {
                    let (node, ranges, set) = (self.node.clone(), Arc::clone(&ranges), set.clone());
                    branch.schedule_kernel(&refs, ValueRange::UNIT, move |i| {
                        node.weight_at(&ranges, |n| set.value(n, i, resolution), target)
                    })
                })
                .collect()
        });

        CombineState::Scheduled { output, weights }
    }
}

impl NodeInstance for CombineInstance<'_> {
    fn set_input_values(&mut self, inputs: &mut NodeInputs<'_>) -> Result<bool, EvalError> {
        if matches!(self.state, CombineState::AwaitingInputs) {
            match inputs.list("Inputs")? {
                Poll::Ready(list) => self.state = CombineState::Ready(list),
                Poll::Pending => return Ok(false),
            }
        }
        Ok(true)
    }

    fn process(&mut self, branch: &BranchData<'_>) -> Result<bool, EvalError> {
        if let CombineState::Ready(inputs) = &self.state {
            self.state = self.schedule(branch, inputs);
        }
        Ok(matches!(self.state, CombineState::Scheduled { .. }))
    }

    fn cache_output_values(&mut self, outputs: &mut NodeOutputs<'_>) {
        if let CombineState::Scheduled { output, weights } =
            std::mem::replace(&mut self.state, CombineState::Published)
        {
            outputs.publish_height("Output", output);
            if let Some(weights) = weights {
                outputs.publish_list("Weights", weights);
            }
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            CombineState::AwaitingInputs => "awaiting-inputs",
            CombineState::Ready(_) => "ready",
            CombineState::Scheduled { .. } => "scheduled",
            CombineState::Published => "published",
        }
    }
}

impl Node for CombineNode {
    fn type_name(&self) -> &'static str {
        "Combine"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        const PORTS: &[PortDescriptor] = &[
            PortDescriptor::list_input("Inputs", false),
            PortDescriptor::output("Output"),
            PortDescriptor::list_output("Weights"),
        ];
        PORTS
    }

    fn validate(&self, id: NodeId, graph: &Graph) -> Result<(), GraphError> {
        let semantic = |message: &str| GraphError::Semantic {
            node: id,
            node_type: self.type_name(),
            message: message.to_string(),
        };
        if !self.blend_factor.is_finite() || self.blend_factor < 0.0 {
            return Err(semantic("blend factor must be finite and non-negative"));
        }
        let consumed = graph.edges_from(id, "Weights").next().is_some();
        match (self.emit_weights, consumed) {
            (true, false) => Err(semantic("weights are emitted but nothing consumes them")),
            (false, true) => Err(semantic("`Weights` is connected but emit_weights is off")),
            _ => Ok(()),
        }
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(CombineInstance {
            node: self,
            state: CombineState::AwaitingInputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Endpoint, TreeKind};
    use crate::nodes::test_support::{assert_close, evaluate, height};
    use crate::nodes::{ConstantNode, GradientNode, HeightOutputNode, WeightOutputNode};

    fn ranges(bounds: &[(f32, f32)]) -> Vec<ValueRange> {
        bounds.iter().map(|&(a, b)| ValueRange::new(a, b)).collect()
    }

    #[test]
    fn test_output_ranges() {
        let r = ranges(&[(0.0, 1.0), (-2.0, 4.0)]);
        assert_eq!(CombineOperation::Add.output_range(&r), ValueRange::new(-2.0, 5.0));
        assert_eq!(CombineOperation::Max.output_range(&r), ValueRange::new(0.0, 4.0));
        assert_eq!(CombineOperation::Min.output_range(&r), ValueRange::new(-2.0, 1.0));
        assert_eq!(CombineOperation::HeightBlend.output_range(&r), ValueRange::new(-2.0, 4.0));
        assert_eq!(CombineOperation::NormalizedMultiply.output_range(&r), ValueRange::UNIT);
    }

    #[test]
    fn test_height_blend_weights_sum_to_one() {
        let node = CombineNode {
            operation: CombineOperation::HeightBlend,
            blend_factor: 0.3,
            emit_weights: true,
        };
        let r = ranges(&[(0.0, 1.0), (0.0, 1.0), (0.0, 1.0)]);
        let values = [0.9, 0.7, 0.1];
        let weights: Vec<f32> = (0..3).map(|t| node.weight_at(&r, |n| values[n], t)).collect();
        assert_close(weights.iter().sum(), 1.0);
        // Only inputs within the blend band of the peak contribute.
        assert_eq!(weights[2], 0.0);
        assert!(weights[0] > weights[1]);

        let blended = node.combine_at(&r, |n| values[n]);
        assert!(blended > 0.7 && blended < 0.9, "{blended}");
    }

    #[test]
    fn test_max_weights_are_one_hot_on_first_winner() {
        let node = CombineNode::new(CombineOperation::Max);
        let r = ranges(&[(0.0, 1.0), (0.0, 1.0), (0.0, 1.0)]);
        let values = [0.2, 0.8, 0.8];
        let weights: Vec<f32> = (0..3).map(|t| node.weight_at(&r, |n| values[n], t)).collect();
        assert_eq!(weights, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_add_weights_uniform_when_all_zero() {
        let node = CombineNode::new(CombineOperation::Add);
        let r = ranges(&[(0.0, 1.0), (0.0, 1.0)]);
        assert_eq!(node.weight_at(&r, |_| 0.0, 1), 0.5);
    }

    #[test]
    fn test_single_input_add_is_identity() {
        let mut graph = Graph::new(TreeKind::Height);
        let gradient = graph.add_node(GradientNode {
            period: 16.0,
            ..GradientNode::default()
        });
        let combine = graph.add_node(CombineNode::default());
        let out = graph.add_node(HeightOutputNode::new("h"));
        let reference = graph.add_node(HeightOutputNode::new("reference"));
        graph.connect(Endpoint::new(gradient, "Output"), Endpoint::at(combine, "Inputs", 0));
        graph.connect(Endpoint::new(combine, "Output"), Endpoint::new(out, "Input"));
        graph.connect(Endpoint::new(gradient, "Output"), Endpoint::new(reference, "Input"));

        let outputs = evaluate(graph, 8);
        assert_eq!(height(&outputs, "h"), height(&outputs, "reference"));
        assert_eq!(outputs.height("h").unwrap().range, ValueRange::new(0.0, 16.0));
    }

    #[test]
    fn test_mixed_resolution_inputs() {
        let mut graph = Graph::new(TreeKind::Height);
        let gradient = graph.add_node(GradientNode {
            period: 100.0,
            ..GradientNode::default()
        });
        let offset = graph.add_node(ConstantNode::new(10.0));
        let combine = graph.add_node(CombineNode::default());
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(gradient, "Output"), Endpoint::at(combine, "Inputs", 0));
        graph.connect(Endpoint::new(offset, "Output"), Endpoint::at(combine, "Inputs", 1));
        graph.connect(Endpoint::new(combine, "Output"), Endpoint::new(out, "Input"));

        let values = height(&evaluate(graph, 4), "h");
        assert_eq!(&values[..4], &[10.0, 11.0, 12.0, 13.0]);
    }

    #[test]
    fn test_no_inputs_is_zero() {
        let mut graph = Graph::new(TreeKind::Height);
        let combine = graph.add_node(CombineNode::new(CombineOperation::Max));
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(combine, "Output"), Endpoint::new(out, "Input"));
        let outputs = evaluate(graph, 2);
        assert_eq!(height(&outputs, "h"), vec![0.0; 4]);
        assert_eq!(outputs.height("h").unwrap().range, ValueRange::point(0.0));
    }

    #[test]
    fn test_emitted_weights_reach_weight_output() {
        let mut graph = Graph::new(TreeKind::Height);
        let low = graph.add_node(ConstantNode::with_range(0.2, ValueRange::UNIT));
        let high = graph.add_node(ConstantNode::with_range(0.9, ValueRange::UNIT));
        let combine = graph.add_node(CombineNode {
            operation: CombineOperation::Max,
            emit_weights: true,
            ..CombineNode::default()
        });
        let height_out = graph.add_node(HeightOutputNode::new("h"));
        let weight_out = graph.add_node(WeightOutputNode::new("w"));
        graph.connect(Endpoint::new(low, "Output"), Endpoint::at(combine, "Inputs", 0));
        graph.connect(Endpoint::new(high, "Output"), Endpoint::at(combine, "Inputs", 1));
        graph.connect(Endpoint::new(combine, "Output"), Endpoint::new(height_out, "Input"));
        graph.connect(Endpoint::new(combine, "Weights"), Endpoint::new(weight_out, "Input"));

        let outputs = evaluate(graph, 2);
        let weights = outputs.weights("w").unwrap();
        assert_eq!(weights.len(), 2);
        assert_eq!(weights[0].samples(), vec![0.0; 4]);
        assert_eq!(weights[1].samples(), vec![1.0; 4]);
    }

    #[test]
    fn test_weight_emission_must_match_consumers() {
        let mut graph = Graph::new(TreeKind::Height);
        let a = graph.add_node(ConstantNode::new(1.0));
        let combine = graph.add_node(CombineNode {
            emit_weights: true,
            ..CombineNode::default()
        });
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(a, "Output"), Endpoint::at(combine, "Inputs", 0));
        graph.connect(Endpoint::new(combine, "Output"), Endpoint::new(out, "Input"));
        assert!(matches!(
            graph.clone().finalize(),
            Err(GraphError::Semantic { .. })
        ));

        let mut graph = Graph::new(TreeKind::Height);
        let a = graph.add_node(ConstantNode::new(1.0));
        let combine = graph.add_node(CombineNode::default());
        let out = graph.add_node(HeightOutputNode::new("h"));
        let weights = graph.add_node(WeightOutputNode::new("w"));
        graph.connect(Endpoint::new(a, "Output"), Endpoint::at(combine, "Inputs", 0));
        graph.connect(Endpoint::new(combine, "Output"), Endpoint::new(out, "Input"));
        graph.connect(Endpoint::new(combine, "Weights"), Endpoint::new(weights, "Input"));
        assert!(matches!(graph.finalize(), Err(GraphError::Semantic { .. })));
    }
}

//! Combination of per-biome heights by per-biome weights.

use std::task::Poll;

use serde::{Deserialize, Serialize};

use super::InputSet;
use crate::branch::BranchData;
use crate::error::{EvalError, GraphError};
use crate::graph::{Graph, NodeId, TreeKind};
use crate::height_data::{HeightData, ValueRange};
use crate::node::{Node, NodeInputs, NodeInstance, NodeOutputs, PortDescriptor};

/// How biome heights are merged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BiomeCombineMode {
    /// Weighted average with negative weights treated as zero.
    #[default]
    Weighted,
    /// Height of the biome with the largest weight.
    Dominant,
}

/// Merge `Heights[i]` using `Weights[i]`. Only valid in biome graphs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BiomeCombineNode {
    /// Merge mode.
    pub mode: BiomeCombineMode,
}

impl BiomeCombineNode {
    /// Merged height of one sample.
    pub(crate) fn combine_at(
        &self,
        count: usize,
        height: impl Fn(usize) -> f32,
        weight: impl Fn(usize) -> f32,
    ) -> f32 {
        match self.mode {
            BiomeCombineMode::Weighted => {
                let (mut total, mut weighted) = (0.0, 0.0);
                for n in 0..count {
                    let w = weight(n).max(0.0);
                    total += w;
                    weighted += w * height(n);
                }
                if total > 0.0 {
                    weighted / total
                } else {
                    (0..count).map(&height).sum::<f32>() / count as f32
                }
            }
            BiomeCombineMode::Dominant => {
                let mut best = 0;
                for n in 1..count {
                    if weight(n) > weight(best) {
                        best = n;
                    }
                }
                height(best)
            }
        }
    }
}

enum BiomeState {
    AwaitingInputs,
    Ready {
        heights: Vec<HeightData>,
        weights: Vec<HeightData>,
    },
    Scheduled(HeightData),
    Published,
}

struct BiomeCombineInstance {
    node: BiomeCombineNode,
    id: NodeId,
    state: BiomeState,
}

impl BiomeCombineInstance {
    fn schedule(&self, branch: &BranchData<'_>, heights: &[HeightData], weights: &[HeightData]) -> HeightData {
        let count = heights.len().min(weights.len());
        if heights.len() != weights.len() {
            tracing::warn!(
                node = %self.id,
                heights = heights.len(),
                weights = weights.len(),
                "biome list lengths differ, pairing the common prefix"
            );
        }
        if count == 0 {
            return branch.constant(0.0, ValueRange::point(0.0));
        }

        let (heights, weights) = (&heights[..count], &weights[..count]);
        let range = heights[1..]
            .iter()
            .fold(heights[0].range, |acc, h| acc.union(&h.range));
        let refs: Vec<&HeightData> = heights.iter().chain(weights).collect();
        let (h, w) = (InputSet::new(heights), InputSet::new(weights));
        let node = self.node.clone();
        let resolution = branch.resolution();
        branch.schedule_kernel(&refs, range, move |i| {
            node.combine_at(
                count,
                |n| h.value(n, i, resolution),
                |n| w.value(n, i, resolution),
            )
        })
    }
}

impl NodeInstance for BiomeCombineInstance {
    fn set_input_values(&mut self, inputs: &mut NodeInputs<'_>) -> Result<bool, EvalError> {
        if !matches!(self.state, BiomeState::AwaitingInputs) {
            return Ok(true);
        }
        let heights = inputs.list("Heights")?;
        let weights = inputs.list("Weights")?;
        match (heights, weights) {
            (Poll::Ready(heights), Poll::Ready(weights)) => {
                self.state = BiomeState::Ready { heights, weights };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn process(&mut self, branch: &BranchData<'_>) -> Result<bool, EvalError> {
        if let BiomeState::Ready { heights, weights } = &self.state {
            self.state = BiomeState::Scheduled(self.schedule(branch, heights, weights));
        }
        Ok(matches!(self.state, BiomeState::Scheduled(_)))
    }

    fn cache_output_values(&mut self, outputs: &mut NodeOutputs<'_>) {
        if let BiomeState::Scheduled(output) =
            std::mem::replace(&mut self.state, BiomeState::Published)
        {
            outputs.publish_height("Output", output);
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            BiomeState::AwaitingInputs => "awaiting-inputs",
            BiomeState::Ready { .. } => "ready",
            BiomeState::Scheduled(_) => "scheduled",
            BiomeState::Published => "published",
        }
    }
}

impl Node for BiomeCombineNode {
    fn type_name(&self) -> &'static str {
        "BiomeCombine"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        const PORTS: &[PortDescriptor] = &[
            PortDescriptor::list_input("Heights", true),
            PortDescriptor::list_input("Weights", true),
            PortDescriptor::output("Output"),
        ];
        PORTS
    }

    fn allowed_in(&self, tree: TreeKind) -> bool {
        tree == TreeKind::Biome
    }

    fn validate(&self, id: NodeId, graph: &Graph) -> Result<(), GraphError> {
        let slots = |port: &'static str| {
            let edges: Vec<_> = graph.edges_into(id, port).collect();
            // Whole-list connections have no count until evaluation.
            edges
                .iter()
                .all(|e| e.target.index.is_some())
                .then_some(edges.len())
        };
        if let (Some(heights), Some(weights)) = (slots("Heights"), slots("Weights")) {
            if heights != weights {
                return Err(GraphError::Semantic {
                    node: id,
                    node_type: self.type_name(),
                    message: format!("{heights} heights but {weights} weights"),
                });
            }
        }
        Ok(())
    }

    fn instantiate(&self, id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(BiomeCombineInstance {
            node: self.clone(),
            id,
            state: BiomeState::AwaitingInputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Endpoint;
    use crate::nodes::test_support::{assert_close, evaluate, height};
    use crate::nodes::{ConstantNode, HeightOutputNode};

    #[test]
    fn test_weighted_average() {
        let node = BiomeCombineNode::default();
        let heights = [10.0, 20.0];
        let weights = [1.0, 3.0];
        assert_close(node.combine_at(2, |n| heights[n], |n| weights[n]), 17.5);
    }

    #[test]
    fn test_negative_weights_ignored_and_zero_total_averages() {
        let node = BiomeCombineNode::default();
        let heights = [10.0, 20.0];
        assert_close(node.combine_at(2, |n| heights[n], |n| [-5.0, 1.0][n]), 20.0);
        assert_close(node.combine_at(2, |n| heights[n], |_| 0.0), 15.0);
    }

    #[test]
    fn test_dominant_picks_largest_weight() {
        let node = BiomeCombineNode {
            mode: BiomeCombineMode::Dominant,
        };
        let heights = [1.0, 2.0, 3.0];
        let weights = [0.2, 0.7, 0.1];
        assert_eq!(node.combine_at(3, |n| heights[n], |n| weights[n]), 2.0);
    }

    fn biome_graph(tree: TreeKind, weight_count: usize) -> Graph {
        let mut graph = Graph::new(tree);
        let combine = graph.add_node(BiomeCombineNode::default());
        for (slot, h) in [4.0, 8.0].into_iter().enumerate() {
            let node = graph.add_node(ConstantNode::new(h));
            graph.connect(Endpoint::new(node, "Output"), Endpoint::at(combine, "Heights", slot));
        }
        for slot in 0..weight_count {
            let node = graph.add_node(ConstantNode::new(1.0));
            graph.connect(Endpoint::new(node, "Output"), Endpoint::at(combine, "Weights", slot));
        }
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(combine, "Output"), Endpoint::new(out, "Input"));
        graph
    }

    #[test]
    fn test_biome_graph_evaluates() {
        let outputs = evaluate(biome_graph(TreeKind::Biome, 2), 2);
        for v in height(&outputs, "h") {
            assert_close(v, 6.0);
        }
        assert_eq!(outputs.height("h").unwrap().range, ValueRange::new(4.0, 8.0));
    }

    #[test]
    fn test_rejected_in_height_graph() {
        assert!(matches!(
            biome_graph(TreeKind::Height, 2).finalize(),
            Err(GraphError::DisallowedNode { .. })
        ));
    }

    #[test]
    fn test_mismatched_counts_rejected() {
        assert!(matches!(
            biome_graph(TreeKind::Biome, 1).finalize(),
            Err(GraphError::Semantic { .. })
        ));
    }
}

//! Value and spatial scaling.

use std::sync::Arc;
use std::task::Poll;

use serde::{Deserialize, Serialize};

use super::move_origin::GridScaleNode;
use crate::branch::BranchData;
use crate::error::{EvalError, GraphError};
use crate::graph::{Endpoint, Graph, NodeId};
use crate::height_data::HeightData;
use crate::node::{Node, NodeInputs, NodeInstance, NodeOutputs, PortDescriptor};

/// Multiply values by `factor` and stretch features spatially by `spatial`.
///
/// A spatial factor other than one is realised at amplification time: a
/// [`GridScaleNode`] with factor `1 / spatial` is fed the same upstream as
/// `Input` and wired into the `Scaled` port, which then takes precedence.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleNode {
    /// Value multiplier, positive.
    pub factor: f32,
    /// Spatial stretch, positive. `2.0` makes features twice as large.
    pub spatial: f64,
}

impl Default for ScaleNode {
    fn default() -> Self {
        Self {
            factor: 1.0,
            spatial: 1.0,
        }
    }
}

impl ScaleNode {
    fn needs_grid_scale(&self) -> bool {
        (self.spatial - 1.0).abs() > f64::EPSILON
    }
}

enum ScaleState {
    AwaitingInput,
    /// Holds the spatially scaled buffer when `Scaled` is connected.
    Ready(HeightData),
    Scheduled(HeightData),
    Published,
}

struct ScaleInstance {
    factor: f32,
    state: ScaleState,
}

impl NodeInstance for ScaleInstance {
    fn set_input_values(&mut self, inputs: &mut NodeInputs<'_>) -> Result<bool, EvalError> {
        if !matches!(self.state, ScaleState::AwaitingInput) {
            return Ok(true);
        }
        let port = if inputs.is_connected("Scaled") {
            "Scaled"
        } else {
            "Input"
        };
        match inputs.required_height(port)? {
            Poll::Ready(data) => {
                self.state = ScaleState::Ready(data);
                Ok(true)
            }
            Poll::Pending => Ok(false),
        }
    }

    fn process(&mut self, branch: &BranchData<'_>) -> Result<bool, EvalError> {
        let ScaleState::Ready(input) = &self.state else {
            return Ok(matches!(self.state, ScaleState::Scheduled(_)));
        };
        let factor = self.factor;
        let source = input.view.clone();
        let resolution = branch.resolution();
        let output = branch.schedule_kernel(&[input], input.range.scaled(factor), move |i| {
            source.sample(i, resolution) * factor
        });
        self.state = ScaleState::Scheduled(output);
        Ok(true)
    }

    fn cache_output_values(&mut self, outputs: &mut NodeOutputs<'_>) {
        if let ScaleState::Scheduled(output) =
            std::mem::replace(&mut self.state, ScaleState::Published)
        {
            outputs.publish_height("Output", output);
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            ScaleState::AwaitingInput => "awaiting-input",
            ScaleState::Ready(_) => "ready",
            ScaleState::Scheduled(_) => "scheduled",
            ScaleState::Published => "published",
        }
    }
}

impl Node for ScaleNode {
    fn type_name(&self) -> &'static str {
        "Scale"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        const PORTS: &[PortDescriptor] = &[
            PortDescriptor::input("Input"),
            PortDescriptor::optional_input("Scaled"),
            PortDescriptor::output("Output"),
        ];
        PORTS
    }

    fn validate(&self, id: NodeId, _graph: &Graph) -> Result<(), GraphError> {
        let valid = self.factor.is_finite()
            && self.factor > 0.0
            && self.spatial.is_finite()
            && self.spatial > 0.0;
        if !valid {
            return Err(GraphError::Semantic {
                node: id,
                node_type: self.type_name(),
                message: format!(
                    "factors must be finite and positive (factor {}, spatial {})",
                    self.factor, self.spatial
                ),
            });
        }
        Ok(())
    }

    fn amplify(&self, id: NodeId, graph: &mut Graph) -> Result<(), GraphError> {
        if !self.needs_grid_scale() || graph.edges_into(id, "Scaled").next().is_some() {
            return Ok(());
        }
        let grid = graph.add_shared_node(Arc::new(GridScaleNode {
            factor: 1.0 / self.spatial,
        }));
        graph.duplicate_input_connections(id, "Input", grid, "Input");
        graph.connect(Endpoint::new(grid, "Output"), Endpoint::new(id, "Scaled"));
        Ok(())
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(ScaleInstance {
            factor: self.factor,
            state: ScaleState::AwaitingInput,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TreeKind;
    use crate::height_data::ValueRange;
    use crate::nodes::test_support::{assert_close, evaluate, height};
    use crate::nodes::{GradientNode, HeightOutputNode};

    fn scaled_gradient(scale: ScaleNode) -> Graph {
        let mut graph = Graph::new(TreeKind::Height);
        let gradient = graph.add_node(GradientNode {
            period: 1000.0,
            ..GradientNode::default()
        });
        let node = graph.add_node(scale);
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(gradient, "Output"), Endpoint::new(node, "Input"));
        graph.connect(Endpoint::new(node, "Output"), Endpoint::new(out, "Input"));
        graph
    }

    #[test]
    fn test_value_scaling() {
        let outputs = evaluate(
            scaled_gradient(ScaleNode {
                factor: 0.5,
                spatial: 1.0,
            }),
            4,
        );
        assert_eq!(outputs.height("h").unwrap().range, ValueRange::new(0.0, 500.0));
        let values = height(&outputs, "h");
        assert_close(values[3], 1.5);
    }

    #[test]
    fn test_spatial_scaling_stretches_features() {
        let outputs = evaluate(
            scaled_gradient(ScaleNode {
                factor: 1.0,
                spatial: 2.0,
            }),
            4,
        );
        // Features twice as large: world x is sampled at half the rate.
        let values = height(&outputs, "h");
        assert_close(values[0], 0.0);
        assert_close(values[1], 0.5);
        assert_close(values[2], 1.0);
        assert_close(values[3], 1.5);
    }

    #[test]
    fn test_fresh_instance_awaits_input() {
        let node = ScaleNode::default();
        let instance = node.instantiate(NodeId(1));
        assert_eq!(instance.state_name(), "awaiting-input");
    }

    #[test]
    fn test_unit_spatial_does_not_amplify() {
        let graph = scaled_gradient(ScaleNode::default());
        let finalized = graph.finalize().unwrap();
        assert_eq!(finalized.graph().node_count(), 3);
    }

    #[test]
    fn test_non_positive_factor_rejected() {
        let graph = scaled_gradient(ScaleNode {
            factor: 0.0,
            spatial: 1.0,
        });
        assert!(matches!(graph.finalize(), Err(GraphError::Semantic { .. })));
    }
}

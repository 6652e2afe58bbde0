//! Nodes that evaluate their upstream subgraph in a derived branch.
//!
//! Neither node demands its input in the calling branch. `process` derives a
//! child branch with a transformed [`TerrainConfig`], runs the evaluator on
//! the input's upstream there, and copies the result into a region of the
//! calling branch. The child shares the arena and scheduler and is dropped
//! before `process` returns; only kernels scheduled on its behalf outlive it.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use super::output::copy_into;
use crate::branch::{BranchData, TerrainConfig};
use crate::error::{EvalError, GraphError};
use crate::graph::{Endpoint, Graph, NodeId};
use crate::height_data::HeightData;
use crate::node::{Node, NodeInputs, NodeInstance, NodeOutputs, PortDescriptor};

const PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("Input"),
    PortDescriptor::output("Output"),
];

enum DerivedState {
    Resolving,
    Ready(Endpoint),
    Scheduled(HeightData),
    Published,
}

struct DerivedInstance<F> {
    node: NodeId,
    transform: F,
    state: DerivedState,
}

impl<F> DerivedInstance<F>
where
    F: Fn(&TerrainConfig) -> TerrainConfig + Send,
{
    fn new(node: NodeId, transform: F) -> Self {
        Self {
            node,
            transform,
            state: DerivedState::Resolving,
        }
    }
}

impl<F> NodeInstance for DerivedInstance<F>
where
    F: Fn(&TerrainConfig) -> TerrainConfig + Send,
{
    fn set_input_values(&mut self, inputs: &mut NodeInputs<'_>) -> Result<bool, EvalError> {
        if matches!(self.state, DerivedState::Resolving) {
            let source = inputs.source_of("Input").ok_or_else(|| EvalError::MissingInput {
                node: self.node,
                port: "Input".to_string(),
            })?;
            self.state = DerivedState::Ready(source.clone());
        }
        Ok(true)
    }

    fn process(&mut self, branch: &BranchData<'_>) -> Result<bool, EvalError> {
        let DerivedState::Ready(source) = &self.state else {
            return Ok(matches!(self.state, DerivedState::Scheduled(_)));
        };
        let config = (self.transform)(branch.config());
        let upstream = {
            let child = branch.derive(config);
            child.evaluate_height(source)?
        };
        self.state = DerivedState::Scheduled(copy_into(branch, &upstream));
        Ok(true)
    }

    fn cache_output_values(&mut self, outputs: &mut NodeOutputs<'_>) {
        if let DerivedState::Scheduled(output) =
            std::mem::replace(&mut self.state, DerivedState::Published)
        {
            outputs.publish_height("Output", output);
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            DerivedState::Resolving => "resolving",
            DerivedState::Ready(_) => "ready",
            DerivedState::Scheduled(_) => "scheduled",
            DerivedState::Published => "published",
        }
    }
}

// ---------------------------------------------------------------------------
// Move-Origin
// ---------------------------------------------------------------------------

/// Sample the upstream subgraph as if the tile origin were shifted by
/// `offset` world units.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveOriginNode {
    /// World-space shift `(x, y)`.
    pub offset: (f64, f64),
}

impl MoveOriginNode {
    /// Shift by `(x, y)`.
    pub fn new(x: f64, y: f64) -> Self {
        Self { offset: (x, y) }
    }
}

impl Node for MoveOriginNode {
    fn type_name(&self) -> &'static str {
        "MoveOrigin"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        PORTS
    }

    fn validate(&self, id: NodeId, _graph: &Graph) -> Result<(), GraphError> {
        if !self.offset.0.is_finite() || !self.offset.1.is_finite() {
            return Err(GraphError::Semantic {
                node: id,
                node_type: self.type_name(),
                message: "offset must be finite".to_string(),
            });
        }
        Ok(())
    }

    fn instantiate(&self, id: NodeId) -> Box<dyn NodeInstance + '_> {
        let offset = DVec2::new(self.offset.0, self.offset.1);
        Box::new(DerivedInstance::new(id, move |config: &TerrainConfig| {
            config.translated(offset)
        }))
    }
}

// ---------------------------------------------------------------------------
// Grid-Scale
// ---------------------------------------------------------------------------

/// Sample the upstream subgraph with origin and cell size multiplied by
/// `factor`. Injected by [`super::ScaleNode`] amplification.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GridScaleNode {
    /// Coordinate multiplier, positive.
    pub factor: f64,
}

impl Default for GridScaleNode {
    fn default() -> Self {
        Self { factor: 1.0 }
    }
}

impl Node for GridScaleNode {
    fn type_name(&self) -> &'static str {
        "GridScale"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        PORTS
    }

    fn validate(&self, id: NodeId, _graph: &Graph) -> Result<(), GraphError> {
        if !self.factor.is_finite() || self.factor <= 0.0 {
            return Err(GraphError::Semantic {
                node: id,
                node_type: self.type_name(),
                message: "grid scale factor must be finite and positive".to_string(),
            });
        }
        Ok(())
    }

    fn instantiate(&self, id: NodeId) -> Box<dyn NodeInstance + '_> {
        let factor = self.factor;
        Box::new(DerivedInstance::new(id, move |config: &TerrainConfig| {
            config.scaled(factor)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TreeKind;
    use crate::nodes::test_support::{assert_close, engine, evaluate, height};
    use crate::nodes::{GradientNode, HeightOutputNode};

    fn shifted_gradient(x: f64, y: f64) -> Graph {
        let mut graph = Graph::new(TreeKind::Height);
        let gradient = graph.add_node(GradientNode {
            period: 10_000.0,
            ..GradientNode::default()
        });
        let shift = graph.add_node(MoveOriginNode::new(x, y));
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(gradient, "Output"), Endpoint::new(shift, "Input"));
        graph.connect(Endpoint::new(shift, "Output"), Endpoint::new(out, "Input"));
        graph
    }

    #[test]
    fn test_shift_matches_unshifted_at_world_position() {
        let shifted = height(&evaluate(shifted_gradient(100.0, 0.0), 4), "h");

        // The plain gradient evaluated with the origin at (100, 0).
        let mut plain = Graph::new(TreeKind::Height);
        let gradient = plain.add_node(GradientNode {
            period: 10_000.0,
            ..GradientNode::default()
        });
        let out = plain.add_node(HeightOutputNode::new("h"));
        plain.connect(Endpoint::new(gradient, "Output"), Endpoint::new(out, "Input"));
        let finalized = plain.finalize().unwrap();
        let reference = engine()
            .evaluate(
                &finalized,
                TerrainConfig {
                    origin: DVec2::new(100.0, 0.0),
                    resolution: 4,
                    ..TerrainConfig::default()
                },
            )
            .unwrap();

        assert_close(shifted[0], 100.0);
        assert_eq!(shifted, height(&reference, "h"));
    }

    #[test]
    fn test_shift_creates_derived_branch() {
        let finalized = shifted_gradient(5.0, 5.0).finalize().unwrap();
        let outputs = engine()
            .evaluate(&finalized, TerrainConfig::default())
            .unwrap();
        outputs.wait().unwrap();
        assert_eq!(outputs.stats().derived_branches, 1);
    }

    #[test]
    fn test_grid_scale_multiplies_coordinates() {
        let mut graph = Graph::new(TreeKind::Height);
        let gradient = graph.add_node(GradientNode {
            period: 10_000.0,
            ..GradientNode::default()
        });
        let grid = graph.add_node(GridScaleNode { factor: 3.0 });
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(gradient, "Output"), Endpoint::new(grid, "Input"));
        graph.connect(Endpoint::new(grid, "Output"), Endpoint::new(out, "Input"));

        let values = height(&evaluate(graph, 4), "h");
        assert_eq!(&values[..4], &[0.0, 3.0, 6.0, 9.0]);
    }
}

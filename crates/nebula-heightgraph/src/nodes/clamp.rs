//! Pointwise clamp to fixed bounds.

use serde::{Deserialize, Serialize};

use super::{Pointwise, UnaryInstance};
use crate::error::GraphError;
use crate::graph::{Graph, NodeId};
use crate::height_data::ValueRange;
use crate::node::{Node, NodeInstance, PortDescriptor};

/// Clamp every sample into `[min, max]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClampNode {
    /// Lower bound.
    pub min: f32,
    /// Upper bound.
    pub max: f32,
}

impl Default for ClampNode {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

impl ClampNode {
    /// Clamp to `[min, max]`.
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Output bound: both ends of the input range clamped.
    pub fn output_range(&self, input: ValueRange) -> ValueRange {
        let bounds = ValueRange::new(self.min, self.max);
        ValueRange::new(bounds.clamp(input.min), bounds.clamp(input.max))
    }
}

impl Node for ClampNode {
    fn type_name(&self) -> &'static str {
        "Clamp"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        const PORTS: &[PortDescriptor] = &[
            PortDescriptor::input("Input"),
            PortDescriptor::output("Output"),
        ];
        PORTS
    }

    fn validate(&self, id: NodeId, _graph: &Graph) -> Result<(), GraphError> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(GraphError::Semantic {
                node: id,
                node_type: self.type_name(),
                message: format!("invalid clamp bounds [{}, {}]", self.min, self.max),
            });
        }
        Ok(())
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(UnaryInstance::new("Input", move |_branch, input| {
            let bounds = ValueRange::new(self.min, self.max);
            Pointwise::new(self.output_range(input), move |v| bounds.clamp(v))
        }))
    }
}

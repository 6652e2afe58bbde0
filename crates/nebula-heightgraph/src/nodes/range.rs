//! Remapping from the declared input range into a target range.

use serde::{Deserialize, Serialize};

use super::{Pointwise, UnaryInstance};
use crate::error::GraphError;
use crate::graph::{Graph, NodeId};
use crate::height_data::ValueRange;
use crate::node::{Node, NodeInstance, PortDescriptor};

const PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("Input"),
    PortDescriptor::output("Output"),
];

/// Pointwise `from -> to` remap: `to_start + (to_end - to_start) * n(v)`.
fn remap(input: ValueRange, to_start: f32, to_end: f32) -> Pointwise {
    Pointwise::new(ValueRange::new(to_start, to_end), move |v| {
        to_start + (to_end - to_start) * input.normalize(v)
    })
}

/// Linearly remap the input's declared range onto `[min, max]`.
///
/// `min > max` flips the field.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NewRangeNode {
    /// Value the input minimum maps to.
    pub min: f32,
    /// Value the input maximum maps to.
    pub max: f32,
}

impl Default for NewRangeNode {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

impl Node for NewRangeNode {
    fn type_name(&self) -> &'static str {
        "NewRange"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        PORTS
    }

    fn validate(&self, id: NodeId, _graph: &Graph) -> Result<(), GraphError> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(GraphError::Semantic {
                node: id,
                node_type: self.type_name(),
                message: "target bounds must be finite".to_string(),
            });
        }
        Ok(())
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        let (min, max) = (self.min, self.max);
        Box::new(UnaryInstance::new("Input", move |_branch, input| {
            remap(input, min, max)
        }))
    }
}

/// Remap the input's declared range onto `[0, 1]`. A degenerate input range
/// yields zero everywhere.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct NormalizeNode;

impl Node for NormalizeNode {
    fn type_name(&self) -> &'static str {
        "Normalize"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        PORTS
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(UnaryInstance::new("Input", |_branch, input| {
            remap(input, 0.0, 1.0)
        }))
    }
}

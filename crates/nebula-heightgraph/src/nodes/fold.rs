//! Reflection of values past a folding line.

use serde::{Deserialize, Serialize};

use super::{Pointwise, UnaryInstance};
use crate::error::GraphError;
use crate::graph::{Graph, NodeId};
use crate::height_data::ValueRange;
use crate::node::{Node, NodeInstance, PortDescriptor};

/// Which side of the line gets folded back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoldDirection {
    /// Values above the line are mirrored below it.
    #[default]
    Above,
    /// Values below the line are mirrored above it.
    Below,
}

/// Mirror samples past `line` back across it: `2 * line - v`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FoldNode {
    /// Folding line.
    pub line: f32,
    /// Side that is folded.
    pub direction: FoldDirection,
}

impl FoldNode {
    /// Fold one value.
    #[inline]
    pub fn fold(&self, value: f32) -> f32 {
        match self.direction {
            FoldDirection::Above if value > self.line => 2.0 * self.line - value,
            FoldDirection::Below if value < self.line => 2.0 * self.line - value,
            _ => value,
        }
    }

    /// Output bound for an input bound.
    pub fn output_range(&self, input: ValueRange) -> ValueRange {
        let line = self.line;
        let mirror = |v: f32| 2.0 * line - v;
        match self.direction {
            FoldDirection::Above if input.max <= line => input,
            FoldDirection::Above if input.min >= line => {
                ValueRange::new(mirror(input.max), mirror(input.min))
            }
            FoldDirection::Above => ValueRange::new(input.min.min(mirror(input.max)), line),
            FoldDirection::Below if input.min >= line => input,
            FoldDirection::Below if input.max <= line => {
                ValueRange::new(mirror(input.max), mirror(input.min))
            }
            FoldDirection::Below => ValueRange::new(line, input.max.max(mirror(input.min))),
        }
    }
}

impl Node for FoldNode {
    fn type_name(&self) -> &'static str {
        "Fold"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        const PORTS: &[PortDescriptor] = &[
            PortDescriptor::input("Input"),
            PortDescriptor::output("Output"),
        ];
        PORTS
    }

    fn validate(&self, id: NodeId, _graph: &Graph) -> Result<(), GraphError> {
        if !self.line.is_finite() {
            return Err(GraphError::Semantic {
                node: id,
                node_type: self.type_name(),
                message: "fold line must be finite".to_string(),
            });
        }
        Ok(())
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(UnaryInstance::new("Input", move |_branch, input| {
            let fold = self.clone();
            Pointwise::new(self.output_range(input), move |v| fold.fold(v))
        }))
    }
}

//! Guarded pointwise division.

use serde::{Deserialize, Serialize};

use super::GatherInstance;
use crate::branch::BranchData;
use crate::error::GraphError;
use crate::graph::{Graph, NodeId};
use crate::height_data::{HeightData, ValueRange};
use crate::node::{Node, NodeInstance, PortDescriptor};

/// `Dividend / Divisor`, zero where the divisor is zero, clamped to
/// `±limit`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DivideNode {
    /// Magnitude bound of the quotient.
    pub limit: f32,
}

impl Default for DivideNode {
    fn default() -> Self {
        Self { limit: 1.0e4 }
    }
}

impl DivideNode {
    /// Quotient of one sample pair.
    #[inline]
    pub fn divide(&self, dividend: f32, divisor: f32) -> f32 {
        if divisor == 0.0 {
            return 0.0;
        }
        let quotient = dividend / divisor;
        if quotient.is_nan() {
            0.0
        } else {
            quotient.clamp(-self.limit, self.limit)
        }
    }

    /// Output bound for the given operand bounds.
    pub fn output_range(&self, dividend: ValueRange, divisor: ValueRange) -> ValueRange {
        let limit = ValueRange::new(-self.limit, self.limit);
        if divisor.min > 0.0 || divisor.max < 0.0 {
            let corners = [
                dividend.min / divisor.min,
                dividend.min / divisor.max,
                dividend.max / divisor.min,
                dividend.max / divisor.max,
            ];
            let lo = corners.iter().copied().fold(f32::INFINITY, f32::min);
            let hi = corners.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            ValueRange::new(limit.clamp(lo), limit.clamp(hi))
        } else if divisor.min == 0.0 && divisor.max == 0.0 {
            ValueRange::point(0.0)
        } else {
            limit
        }
    }
}

impl Node for DivideNode {
    fn type_name(&self) -> &'static str {
        "Divide"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        const PORTS: &[PortDescriptor] = &[
            PortDescriptor::input("Dividend"),
            PortDescriptor::input("Divisor"),
            PortDescriptor::output("Output"),
        ];
        PORTS
    }

    fn validate(&self, id: NodeId, _graph: &Graph) -> Result<(), GraphError> {
        if !self.limit.is_finite() || self.limit <= 0.0 {
            return Err(GraphError::Semantic {
                node: id,
                node_type: self.type_name(),
                message: format!("limit must be finite and positive, got {}", self.limit),
            });
        }
        Ok(())
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(GatherInstance::new(
            &["Dividend", "Divisor"],
            move |branch: &BranchData<'_>, operands: &[HeightData]| {
                let (dividend, divisor) = (&operands[0], &operands[1]);
                let node = self.clone();
                let (a, b) = (dividend.view.clone(), divisor.view.clone());
                let resolution = branch.resolution();
                branch.schedule_kernel(
                    &[dividend, divisor],
                    self.output_range(dividend.range, divisor.range),
                    move |i| node.divide(a.sample(i, resolution), b.sample(i, resolution)),
                )
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Endpoint, TreeKind};
    use crate::nodes::test_support::{assert_close, evaluate, height};
    use crate::nodes::{ConstantNode, HeightOutputNode};

    #[test]
    fn test_divide_by_zero_is_zero() {
        let node = DivideNode::default();
        assert_eq!(node.divide(5.0, 0.0), 0.0);
        assert_eq!(node.divide(0.0, 0.0), 0.0);
        assert_eq!(node.divide(6.0, 3.0), 2.0);
    }

    #[test]
    fn test_quotient_clamped_to_limit() {
        let node = DivideNode { limit: 10.0 };
        assert_eq!(node.divide(1.0, 1e-6), 10.0);
        assert_eq!(node.divide(-1.0, 1e-6), -10.0);
    }

    #[test]
    fn test_ranges() {
        let node = DivideNode { limit: 100.0 };
        assert_eq!(
            node.output_range(ValueRange::new(1.0, 4.0), ValueRange::new(2.0, 4.0)),
            ValueRange::new(0.25, 2.0)
        );
        assert_eq!(
            node.output_range(ValueRange::new(1.0, 4.0), ValueRange::new(-1.0, 1.0)),
            ValueRange::new(-100.0, 100.0)
        );
        assert_eq!(
            node.output_range(ValueRange::new(1.0, 4.0), ValueRange::point(0.0)),
            ValueRange::point(0.0)
        );
        assert_eq!(
            node.output_range(ValueRange::new(1.0, 1000.0), ValueRange::new(1.0, 2.0)),
            ValueRange::new(0.5, 100.0)
        );
    }

    #[test]
    fn test_divide_graph() {
        let mut graph = Graph::new(TreeKind::Height);
        let a = graph.add_node(ConstantNode::new(9.0));
        let b = graph.add_node(ConstantNode::new(3.0));
        let divide = graph.add_node(DivideNode::default());
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(a, "Output"), Endpoint::new(divide, "Dividend"));
        graph.connect(Endpoint::new(b, "Output"), Endpoint::new(divide, "Divisor"));
        graph.connect(Endpoint::new(divide, "Output"), Endpoint::new(out, "Input"));

        let outputs = evaluate(graph, 2);
        for v in height(&outputs, "h") {
            assert_close(v, 3.0);
        }
        assert_eq!(outputs.height("h").unwrap().range, ValueRange::point(3.0));
    }
}

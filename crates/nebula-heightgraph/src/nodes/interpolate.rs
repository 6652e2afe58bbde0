//! Blend between two inputs by a third.

use serde::{Deserialize, Serialize};

use super::GatherInstance;
use crate::branch::BranchData;
use crate::graph::NodeId;
use crate::height_data::HeightData;
use crate::node::{Node, NodeInstance, PortDescriptor};

/// `lerp(A, B, n(Strength))`, where `n` normalises by the strength's
/// declared range.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct InterpolateNode;

fn schedule(branch: &BranchData<'_>, inputs: &[HeightData]) -> HeightData {
    let (a, b, strength) = (&inputs[0], &inputs[1], &inputs[2]);
    let (va, vb, vs) = (a.view.clone(), b.view.clone(), strength.view.clone());
    let strength_range = strength.range;
    let resolution = branch.resolution();
    branch.schedule_kernel(&[a, b, strength], a.range.union(&b.range), move |i| {
        let t = strength_range.normalize(vs.sample(i, resolution));
        let from = va.sample(i, resolution);
        from + (vb.sample(i, resolution) - from) * t
    })
}

impl Node for InterpolateNode {
    fn type_name(&self) -> &'static str {
        "Interpolate"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        const PORTS: &[PortDescriptor] = &[
            PortDescriptor::input("A"),
            PortDescriptor::input("B"),
            PortDescriptor::input("Strength"),
            PortDescriptor::output("Output"),
        ];
        PORTS
    }

    fn instantiate(&self, _id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(GatherInstance::new(&["A", "B", "Strength"], schedule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Endpoint, Graph, TreeKind};
    use crate::height_data::ValueRange;
    use crate::nodes::test_support::{assert_close, evaluate, height};
    use crate::nodes::{ConstantNode, GradientNode, HeightOutputNode};

    fn interpolate(strength: impl Node + 'static, resolution: u32) -> crate::engine::BranchOutputs {
        let mut graph = Graph::new(TreeKind::Height);
        let a = graph.add_node(ConstantNode::new(0.0));
        let b = graph.add_node(ConstantNode::new(10.0));
        let s = graph.add_node(strength);
        let lerp = graph.add_node(InterpolateNode);
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(a, "Output"), Endpoint::new(lerp, "A"));
        graph.connect(Endpoint::new(b, "Output"), Endpoint::new(lerp, "B"));
        graph.connect(Endpoint::new(s, "Output"), Endpoint::new(lerp, "Strength"));
        graph.connect(Endpoint::new(lerp, "Output"), Endpoint::new(out, "Input"));
        evaluate(graph, resolution)
    }

    #[test]
    fn test_midpoint_strength() {
        let outputs = interpolate(ConstantNode::with_range(0.5, ValueRange::UNIT), 4);
        for v in height(&outputs, "h") {
            assert_close(v, 5.0);
        }
        assert_eq!(outputs.height("h").unwrap().range, ValueRange::new(0.0, 10.0));
    }

    #[test]
    fn test_strength_normalised_by_declared_range() {
        // Gradient over period 4 at resolution 4: row values 0, 1, 2, 3 in [0, 4].
        let outputs = interpolate(
            GradientNode {
                period: 4.0,
                ..GradientNode::default()
            },
            4,
        );
        let values = height(&outputs, "h");
        for (x, expected) in [0.0, 2.5, 5.0, 7.5].into_iter().enumerate() {
            assert_close(values[x], expected);
        }
    }
}

//! Sampled response curves.

use serde::{Deserialize, Serialize};

use super::{Pointwise, UnaryInstance};
use crate::error::GraphError;
use crate::graph::{Graph, NodeId};
use crate::height_data::ValueRange;
use crate::node::{Node, NodeInstance, PortDescriptor};

/// A piecewise-linear curve over `[0, 1]`, pre-sampled into a lookup table.
#[derive(Clone, Debug, PartialEq)]
pub struct CurveTable {
    values: Vec<f32>,
}

impl CurveTable {
    /// Sample the polyline through `points` at `samples` evenly spaced
    /// positions of `[0, 1]`. Points need not be sorted; the curve is flat
    /// beyond the first and last point.
    pub fn build(points: &[(f32, f32)], samples: usize) -> Self {
        let mut sorted = points.to_vec();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        let samples = samples.max(2);
        let values = (0..samples)
            .map(|s| polyline(&sorted, s as f32 / (samples - 1) as f32))
            .collect();
        Self { values }
    }

    /// Curve value at `t`, clamped into `[0, 1]`, interpolating between
    /// neighbouring table entries.
    #[inline]
    pub fn sample(&self, t: f32) -> f32 {
        let last = self.values.len() - 1;
        let position = t.clamp(0.0, 1.0) * last as f32;
        let lower = (position.floor() as usize).min(last);
        let upper = (lower + 1).min(last);
        let frac = position - lower as f32;
        self.values[lower] + (self.values[upper] - self.values[lower]) * frac
    }

    /// Number of table entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always `false`: a table has at least two entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn polyline(sorted: &[(f32, f32)], x: f32) -> f32 {
    let Some(&(first_x, first_y)) = sorted.first() else {
        return 0.0;
    };
    if x <= first_x {
        return first_y;
    }
    for pair in sorted.windows(2) {
        let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
        if x <= x1 {
            let span = x1 - x0;
            return if span > 0.0 { y0 + (y1 - y0) * (x - x0) / span } else { y1 };
        }
    }
    sorted[sorted.len() - 1].1
}

/// Map the normalised input through a curve, then into `output`.
///
/// The table is built once per node and branch and kept in the branch cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveNode {
    /// Control points `(x, y)`, `x` in `[0, 1]` over the normalised input.
    pub points: Vec<(f32, f32)>,
    /// Range a curve value of `0..1` maps onto.
    pub output: ValueRange,
    /// Lookup table size.
    pub samples: usize,
}

impl Default for CurveNode {
    fn default() -> Self {
        Self {
            points: vec![(0.0, 0.0), (1.0, 1.0)],
            output: ValueRange::UNIT,
            samples: 256,
        }
    }
}

impl CurveNode {
    fn y_bounds(&self) -> (f32, f32) {
        self.points
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &(_, y)| {
                (lo.min(y), hi.max(y))
            })
    }

    /// Bound of every value the node can produce.
    pub fn output_range(&self) -> ValueRange {
        let (lo, hi) = self.y_bounds();
        ValueRange::new(self.output.lerp(lo), self.output.lerp(hi))
    }
}

impl Node for CurveNode {
    fn type_name(&self) -> &'static str {
        "Curve"
    }

    fn ports(&self) -> &'static [PortDescriptor] {
        const PORTS: &[PortDescriptor] = &[
            PortDescriptor::input("Input"),
            PortDescriptor::output("Output"),
        ];
        PORTS
    }

    fn validate(&self, id: NodeId, _graph: &Graph) -> Result<(), GraphError> {
        let fail = |message: &str| {
            Err(GraphError::Semantic {
                node: id,
                node_type: self.type_name(),
                message: message.to_string(),
            })
        };
        if self.points.is_empty() {
            return fail("curve needs at least one point");
        }
        if self.samples < 2 {
            return fail("curve needs at least two samples");
        }
        if self.points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return fail("curve points must be finite");
        }
        if !self.output.min.is_finite() || !self.output.max.is_finite() {
            return fail("output range must be finite");
        }
        Ok(())
    }

    fn instantiate(&self, id: NodeId) -> Box<dyn NodeInstance + '_> {
        Box::new(UnaryInstance::new("Input", move |branch, input: ValueRange| {
            let table = branch
                .cache()
                .get_or_insert_with(id, || CurveTable::build(&self.points, self.samples));
            let output = self.output;
            Pointwise::new(self.output_range(), move |v| {
                output.lerp(table.sample(input.normalize(v)))
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Endpoint, TreeKind};
    use crate::nodes::test_support::{assert_close, evaluate, height};
    use crate::nodes::{GradientNode, HeightOutputNode};

    #[test]
    fn test_table_interpolates_points() {
        let table = CurveTable::build(&[(0.0, 0.0), (0.5, 1.0), (1.0, 0.0)], 101);
        assert_eq!(table.len(), 101);
        assert_close(table.sample(0.0), 0.0);
        assert_close(table.sample(0.25), 0.5);
        assert_close(table.sample(0.5), 1.0);
        assert_close(table.sample(0.75), 0.5);
        assert_close(table.sample(2.0), 0.0);
    }

    #[test]
    fn test_table_flat_outside_points() {
        let table = CurveTable::build(&[(0.8, 3.0), (0.2, 1.0)], 11);
        assert_close(table.sample(0.0), 1.0);
        assert_close(table.sample(1.0), 3.0);
        assert_close(table.sample(0.5), 2.0);
    }

    #[test]
    fn test_output_range_uses_point_extremes() {
        let node = CurveNode {
            points: vec![(0.0, 0.25), (1.0, 0.75)],
            output: ValueRange::new(0.0, 100.0),
            samples: 16,
        };
        assert_eq!(node.output_range(), ValueRange::new(25.0, 75.0));
    }

    #[test]
    fn test_inverting_curve_in_graph() {
        let mut graph = Graph::new(TreeKind::Height);
        let gradient = graph.add_node(GradientNode {
            period: 4.0,
            ..GradientNode::default()
        });
        let curve = graph.add_node(CurveNode {
            points: vec![(0.0, 1.0), (1.0, 0.0)],
            output: ValueRange::new(0.0, 8.0),
            samples: 5,
        });
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(gradient, "Output"), Endpoint::new(curve, "Input"));
        graph.connect(Endpoint::new(curve, "Output"), Endpoint::new(out, "Input"));

        let outputs = evaluate(graph, 4);
        let values = height(&outputs, "h");
        for (x, expected) in [8.0, 6.0, 4.0, 2.0].into_iter().enumerate() {
            assert_close(values[x], expected);
        }
    }

    #[test]
    fn test_empty_points_rejected() {
        let mut graph = Graph::new(TreeKind::Height);
        let gradient = graph.add_node(GradientNode::default());
        let curve = graph.add_node(CurveNode {
            points: Vec::new(),
            ..CurveNode::default()
        });
        let out = graph.add_node(HeightOutputNode::new("h"));
        graph.connect(Endpoint::new(gradient, "Output"), Endpoint::new(curve, "Input"));
        graph.connect(Endpoint::new(curve, "Output"), Endpoint::new(out, "Input"));
        assert!(matches!(graph.finalize(), Err(GraphError::Semantic { .. })));
    }
}

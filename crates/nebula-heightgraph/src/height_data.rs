//! The value carried along a graph edge: a region, its completion handle and
//! the declared bound of its samples.

use serde::{Deserialize, Serialize};

use crate::arena::{IndexAndResolution, RegionView};
use crate::scheduler::JobHandle;

/// Declared theoretical bound of a buffer's samples.
///
/// This is computed analytically by every node from its inputs' bounds, not
/// measured. Downstream nodes normalise against it, so it must contain every
/// sample the node writes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    /// Inclusive lower bound.
    pub min: f32,
    /// Inclusive upper bound.
    pub max: f32,
}

impl ValueRange {
    /// The unit interval `[0, 1]`.
    pub const UNIT: Self = Self { min: 0.0, max: 1.0 };

    /// Build a range from two bounds in either order.
    pub fn new(a: f32, b: f32) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// A degenerate range holding a single value.
    pub fn point(value: f32) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    /// `max - min`.
    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    /// Returns `true` if the range holds a single value.
    pub fn is_degenerate(&self) -> bool {
        self.span() <= 0.0
    }

    /// Smallest range containing both.
    pub fn union(&self, other: &ValueRange) -> ValueRange {
        ValueRange {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Smallest range containing `self` and `value`.
    pub fn including(&self, value: f32) -> ValueRange {
        self.union(&ValueRange::point(value))
    }

    /// Clamp a value into the range.
    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }

    /// Map a value in the range to `[0, 1]`; a degenerate range maps to `0`.
    #[inline]
    pub fn normalize(&self, value: f32) -> f32 {
        let span = self.span();
        if span > 0.0 {
            ((value - self.min) / span).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Map `t` in `[0, 1]` into the range.
    #[inline]
    pub fn lerp(&self, t: f32) -> f32 {
        self.min + (self.max - self.min) * t
    }

    /// Range of `value * factor`.
    pub fn scaled(&self, factor: f32) -> ValueRange {
        ValueRange::new(self.min * factor, self.max * factor)
    }

    /// Returns `true` if `value` lies inside the range, allowing `epsilon`
    /// of slack on both sides.
    pub fn contains(&self, value: f32, epsilon: f32) -> bool {
        value >= self.min - epsilon && value <= self.max + epsilon
    }

    /// Returns `true` if `other` lies completely inside this range.
    pub fn encloses(&self, other: &ValueRange) -> bool {
        self.min <= other.min && other.max <= self.max
    }
}

/// A node output: a region of the arena, the handle of the job writing it and
/// the declared range of its samples.
#[derive(Clone, Debug)]
pub struct HeightData {
    /// Completes once every sample of `view` is written.
    pub task: JobHandle,
    /// Read access to the region.
    pub view: RegionView,
    /// Declared bound of the samples.
    pub range: ValueRange,
}

impl HeightData {
    /// Region descriptor of the buffer.
    pub fn region(&self) -> IndexAndResolution {
        self.view.region()
    }

    /// Grid resolution of the buffer.
    pub fn resolution(&self) -> u32 {
        self.view.resolution()
    }

    /// Read the sample covering `target_index` of a `target_resolution²` grid.
    ///
    /// Only valid inside a kernel that lists [`HeightData::task`] as a
    /// dependency, or after [`HeightData::wait`].
    #[inline]
    pub fn sample(&self, target_index: usize, target_resolution: u32) -> f32 {
        self.view.sample(target_index, target_resolution)
    }

    /// Block until the buffer is fully written.
    pub fn wait(&self) {
        self.task.wait();
    }

    /// Wait for the buffer and copy it out, row-major.
    pub fn samples(&self) -> Vec<f32> {
        self.task.wait();
        self.view.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_orders_bounds() {
        let r = ValueRange::new(3.0, -1.0);
        assert_eq!(r.min, -1.0);
        assert_eq!(r.max, 3.0);
    }

    #[test]
    fn test_normalize_and_lerp_are_inverse() {
        let r = ValueRange::new(-2.0, 6.0);
        for v in [-2.0_f32, 0.0, 1.5, 6.0] {
            let t = r.normalize(v);
            assert!((r.lerp(t) - v).abs() < 1e-6);
        }
    }

    #[test]
    fn test_degenerate_normalizes_to_zero() {
        let r = ValueRange::point(4.0);
        assert!(r.is_degenerate());
        assert_eq!(r.normalize(4.0), 0.0);
    }

    #[test]
    fn test_union_and_including() {
        let a = ValueRange::new(0.0, 1.0);
        let b = ValueRange::new(-3.0, 0.5);
        assert_eq!(a.union(&b), ValueRange::new(-3.0, 1.0));
        assert_eq!(a.including(5.0), ValueRange::new(0.0, 5.0));
        assert!(a.union(&b).encloses(&a));
    }

    #[test]
    fn test_scaled_by_negative_factor_reorders() {
        let r = ValueRange::new(1.0, 2.0).scaled(-2.0);
        assert_eq!(r, ValueRange::new(-4.0, -2.0));
    }
}

//! Per-output statistics printed after an evaluation.

use std::fmt;

use nebula_heightgraph::{HeightData, ValueRange};

/// Observed statistics of one evaluated buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputSummary {
    /// Output name, with `[i]` appended for weight list elements.
    pub name: String,
    /// Samples per side.
    pub resolution: u32,
    /// Smallest sample.
    pub min: f32,
    /// Largest sample.
    pub max: f32,
    /// Arithmetic mean.
    pub mean: f64,
    /// Range the producing node declared.
    pub declared: ValueRange,
}

impl OutputSummary {
    /// Wait for `data` and summarise its samples.
    pub fn of(name: impl Into<String>, data: &HeightData) -> Self {
        Self::from_samples(name, data.resolution(), &data.samples(), data.range)
    }

    pub(crate) fn from_samples(
        name: impl Into<String>,
        resolution: u32,
        samples: &[f32],
        declared: ValueRange,
    ) -> Self {
        let (min, max, sum) = samples.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY, 0.0_f64),
            |(min, max, sum), v| (min.min(*v), max.max(*v), sum + f64::from(*v)),
        );
        let mean = if samples.is_empty() {
            0.0
        } else {
            sum / samples.len() as f64
        };
        Self {
            name: name.into(),
            resolution,
            min,
            max,
            mean,
            declared,
        }
    }

    /// Whether every sample lies in the declared range.
    pub fn within_declared(&self) -> bool {
        let eps = 1e-4 * (1.0 + self.declared.span().abs());
        self.declared.contains(self.min, eps) && self.declared.contains(self.max, eps)
    }
}

impl fmt::Display for OutputSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<20} {:>4}x{:<4} min {:>12.4} max {:>12.4} mean {:>12.4}  declared [{:.4}, {:.4}]",
            self.name,
            self.resolution,
            self.resolution,
            self.min,
            self.max,
            self.mean,
            self.declared.min,
            self.declared.max,
        )?;
        if !self.within_declared() {
            write!(f, "  OUT OF RANGE")?;
        }
        Ok(())
    }
}

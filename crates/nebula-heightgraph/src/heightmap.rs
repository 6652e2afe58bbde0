//! Multi-octave fractal Brownian motion (fBm) over simplex noise, sampled in
//! world coordinates by the noise source node.

use noise::{NoiseFn, Simplex};

/// Parameters of one fBm field.
#[derive(Clone, Debug, PartialEq)]
pub struct FbmParams {
    /// Seed of the underlying simplex permutation table.
    pub seed: u64,
    /// Number of octaves composited. Zero yields a flat field.
    pub octaves: u32,
    /// Frequency multiplier between successive octaves.
    pub lacunarity: f64,
    /// Amplitude multiplier between successive octaves.
    pub persistence: f64,
    /// Frequency of the first octave, in cycles per world unit.
    pub frequency: f64,
    /// Amplitude of the first octave.
    pub amplitude: f64,
}

impl Default for FbmParams {
    fn default() -> Self {
        Self {
            seed: 0,
            octaves: 6,
            lacunarity: 2.0,
            persistence: 0.5,
            frequency: 0.01,
            amplitude: 1.0,
        }
    }
}

/// Samples an fBm field at 2D world positions.
pub struct FbmSampler {
    noise: Simplex,
    params: FbmParams,
}

impl std::fmt::Debug for FbmSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FbmSampler")
            .field("params", &self.params)
            .finish()
    }
}

impl FbmSampler {
    /// Build the sampler. Only the low 32 bits of the seed select the
    /// permutation table; the high bits are folded in first.
    pub fn new(params: FbmParams) -> Self {
        let folded = (params.seed ^ (params.seed >> 32)) as u32;
        Self {
            noise: Simplex::new(folded),
            params,
        }
    }

    /// Field value at `(x, y)`. Always within `±max_amplitude()`.
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let mut total = 0.0;
        let mut frequency = self.params.frequency;
        let mut amplitude = self.params.amplitude;

        for _ in 0..self.params.octaves {
            total += self.noise.get([x * frequency, y * frequency]) * amplitude;
            frequency *= self.params.lacunarity;
            amplitude *= self.params.persistence;
        }

        total
    }

    /// Theoretical bound on `|sample|`: the sum of every octave's absolute
    /// amplitude.
    pub fn max_amplitude(&self) -> f64 {
        let mut sum = 0.0;
        let mut amplitude = self.params.amplitude.abs();
        for _ in 0..self.params.octaves {
            sum += amplitude;
            amplitude *= self.params.persistence.abs();
        }
        sum
    }

    /// Parameters the sampler was built with.
    pub fn params(&self) -> &FbmParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-12;

    #[test]
    fn test_same_seed_same_value() {
        let params = FbmParams {
            seed: 42,
            ..Default::default()
        };
        let a = FbmSampler::new(params.clone());
        let b = FbmSampler::new(params);
        assert!(
            (a.sample(100.0, 200.0) - b.sample(100.0, 200.0)).abs() < EPSILON,
            "same seed and position must agree"
        );
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = FbmSampler::new(FbmParams {
            seed: 1,
            ..Default::default()
        });
        let b = FbmSampler::new(FbmParams {
            seed: 999,
            ..Default::default()
        });
        assert!(
            (a.sample(50.0, 50.0) - b.sample(50.0, 50.0)).abs() > EPSILON,
            "different seeds should give different fields"
        );
    }

    #[test]
    fn test_values_within_max_amplitude() {
        let sampler = FbmSampler::new(FbmParams {
            amplitude: 40.0,
            ..Default::default()
        });
        let bound = sampler.max_amplitude();
        for x in (0..60).map(|i| i as f64 * 7.3) {
            for y in (0..60).map(|i| i as f64 * 3.1) {
                let h = sampler.sample(x, y);
                assert!(h.abs() <= bound + EPSILON, "{h} exceeds {bound} at ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_max_amplitude_is_geometric_sum() {
        let sampler = FbmSampler::new(FbmParams {
            amplitude: 1000.0,
            persistence: 0.5,
            octaves: 4,
            ..Default::default()
        });
        assert!((sampler.max_amplitude() - 1875.0).abs() < EPSILON);
    }

    #[test]
    fn test_negative_persistence_bound_uses_magnitude() {
        let sampler = FbmSampler::new(FbmParams {
            amplitude: -2.0,
            persistence: -0.5,
            octaves: 2,
            ..Default::default()
        });
        assert!((sampler.max_amplitude() - 3.0).abs() < EPSILON);
    }

    #[test]
    fn test_zero_octaves_is_flat() {
        let sampler = FbmSampler::new(FbmParams {
            octaves: 0,
            ..Default::default()
        });
        assert_eq!(sampler.sample(12.0, -4.0), 0.0);
        assert_eq!(sampler.max_amplitude(), 0.0);
    }
}

//! Fractal noise heightfield generation.
//!
//! Sums octaves of simplex noise over the terrain's world-space grid so the
//! generated relief keeps its shape when the grid resolution changes.

use noise::{NoiseFn, Simplex};

use crate::error::TerrainError;
use crate::heightfield::Heightfield;
use crate::settings::TerrainSettings;

/// Octave parameters for [`HeightmapSampler`].
#[derive(Clone, Debug, PartialEq)]
pub struct HeightmapParams {
    pub seed: u32,
    /// Number of octaves summed per sample.
    pub octaves: u32,
    /// Frequency multiplier between octaves.
    pub lacunarity: f64,
    /// Amplitude multiplier between octaves.
    pub persistence: f64,
    /// Frequency of the broadest octave, in cycles per world unit.
    pub base_frequency: f64,
    /// Height contribution of the broadest octave, in world units.
    pub amplitude: f64,
}

impl Default for HeightmapParams {
    fn default() -> Self {
        Self {
            seed: 0,
            octaves: 6,
            lacunarity: 2.0,
            persistence: 0.5,
            base_frequency: 0.0004,
            amplitude: 600.0,
        }
    }
}

pub struct HeightmapSampler {
    noise: Simplex,
    params: HeightmapParams,
}

impl HeightmapSampler {
    pub fn new(params: HeightmapParams) -> Self {
        Self {
            noise: Simplex::new(params.seed),
            params,
        }
    }

    /// Height at a world-space position on the terrain plane.
    pub fn sample(&self, u: f64, v: f64) -> f64 {
        let mut total = 0.0;
        let mut frequency = self.params.base_frequency;
        let mut amplitude = self.params.amplitude;
        for _ in 0..self.params.octaves {
            total += self.noise.get([u * frequency, v * frequency]) * amplitude;
            frequency *= self.params.lacunarity;
            amplitude *= self.params.persistence;
        }
        total
    }

    /// Upper bound on `|sample|`, the geometric sum of octave amplitudes.
    pub fn max_amplitude(&self) -> f64 {
        let mut sum = 0.0;
        let mut amplitude = self.params.amplitude;
        for _ in 0..self.params.octaves {
            sum += amplitude;
            amplitude *= self.params.persistence;
        }
        sum
    }

    pub fn params(&self) -> &HeightmapParams {
        &self.params
    }

    /// Sample every grid vertex of a terrain with the given settings.
    pub fn generate(&self, settings: TerrainSettings) -> Result<Heightfield, TerrainError> {
        let scale = f64::from(settings.grid_scale());
        let base = f64::from(settings.grid_base());
        Heightfield::from_fn(settings, |x, y| {
            let u = f64::from(x) * scale + base;
            let v = f64::from(y) * scale + base;
            self.sample(u, v) as f32
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::HeightfieldSource;

    const EPSILON: f64 = 1e-12;

    fn small_settings() -> TerrainSettings {
        TerrainSettings {
            size: 33,
            world_size: 3200.0,
            max_batch_size: 17,
            min_batch_size: 9,
            ..Default::default()
        }
    }

    #[test]
    fn test_same_seed_same_field() {
        let params = HeightmapParams {
            seed: 42,
            ..Default::default()
        };
        let a = HeightmapSampler::new(params.clone())
            .generate(small_settings())
            .unwrap();
        let b = HeightmapSampler::new(params).generate(small_settings()).unwrap();
        assert_eq!(
            a.height_data(),
            b.height_data(),
            "same seed must produce identical heightfields"
        );
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = HeightmapSampler::new(HeightmapParams {
            seed: 1,
            ..Default::default()
        });
        let b = HeightmapSampler::new(HeightmapParams {
            seed: 999,
            ..Default::default()
        });
        let h1 = a.sample(1500.0, -700.0);
        let h2 = b.sample(1500.0, -700.0);
        assert!(
            (h1 - h2).abs() > EPSILON,
            "different seeds should produce different heights: {h1} vs {h2}"
        );
    }

    #[test]
    fn test_generated_heights_within_amplitude() {
        let sampler = HeightmapSampler::new(HeightmapParams::default());
        let field = sampler.generate(small_settings()).unwrap();
        let max = sampler.max_amplitude() as f32;
        let (lo, hi) = field.height_range();
        assert!(lo >= -max && hi <= max, "range {lo}..{hi} exceeds ±{max}");
        assert!(hi > lo, "noise field should not be flat");
    }

    #[test]
    fn test_max_amplitude_is_geometric_sum() {
        let sampler = HeightmapSampler::new(HeightmapParams {
            amplitude: 1000.0,
            persistence: 0.5,
            octaves: 4,
            ..Default::default()
        });
        assert!((sampler.max_amplitude() - 1875.0).abs() < EPSILON);
    }

    #[test]
    fn test_zero_amplitude_is_flat() {
        let sampler = HeightmapSampler::new(HeightmapParams {
            amplitude: 0.0,
            ..Default::default()
        });
        let field = sampler.generate(small_settings()).unwrap();
        assert_eq!(field.height_range(), (0.0, 0.0));
    }
}

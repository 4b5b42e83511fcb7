use ndarray::Array2;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal, Uniform};

use super::TrackingDataset;
use crate::{
    Result, TrainErr,
    config::{GeometryConfig, SearchConfig},
};

/// Generates tracking samples from the search and template crop geometry.
///
/// Each sample places a target inside a search region cropped `search.factor` times the target's
/// size around a jittered center, the way training crops are sampled. The features are a noisy
/// observation of the target box followed by distractor values.
#[derive(Debug, Clone)]
pub struct SyntheticTracking {
    search: SearchConfig,
    template: GeometryConfig,
}

impl SyntheticTracking {
    pub fn new(search: SearchConfig, template: GeometryConfig) -> Self {
        Self { search, template }
    }

    /// Generates `n` samples with `input_dim` features each.
    ///
    /// # Arguments
    /// * `n` - The amount of samples.
    /// * `input_dim` - The size of each feature vector, at least 4.
    /// * `seed` - Seeds the generation, equal seeds give equal datasets.
    pub fn generate(&self, n: usize, input_dim: usize, seed: u64) -> Result<TrackingDataset> {
        if input_dim < 4 {
            return Err(TrainErr::Data(format!(
                "synthetic samples need at least 4 features, got {input_dim}"
            )));
        }

        let distribution_err = |e: &dyn std::fmt::Display| TrainErr::Data(e.to_string());

        let mut rng = StdRng::seed_from_u64(seed);
        let unit = Uniform::new(-1.0_f32, 1.0).map_err(|e| distribution_err(&e))?;
        let aspect = Uniform::new(0.5_f32, 2.0).map_err(|e| distribution_err(&e))?;

        // One template pixel, the resolution the target is observed with.
        let observation_std = self.template.factor / self.template.size as f32;
        let noise = Normal::new(0.0_f32, observation_std).map_err(|e| distribution_err(&e))?;

        let factor = self.search.factor;
        let mut inputs = Array2::zeros((n, input_dim));
        let mut targets = Array2::zeros((n, 4));

        for i in 0..n {
            let scale = (self.search.scale_jitter * unit.sample(&mut rng)).exp();
            let ratio = aspect.sample(&mut rng).sqrt();

            let w = (scale * ratio / factor).clamp(0.02, 0.9);
            let h = (scale / ratio / factor).clamp(0.02, 0.9);

            let max_shift = 0.5 * self.search.center_jitter / factor;
            let cx = (0.5 + max_shift * unit.sample(&mut rng)).clamp(w / 2., 1. - w / 2.);
            let cy = (0.5 + max_shift * unit.sample(&mut rng)).clamp(h / 2., 1. - h / 2.);

            let target = [cx, cy, w, h];
            for (k, value) in target.iter().enumerate() {
                targets[[i, k]] = *value;
                inputs[[i, k]] = value + noise.sample(&mut rng);
            }

            for k in 4..input_dim {
                inputs[[i, k]] = rng.random_range(-1.0..1.0);
            }
        }

        TrackingDataset::new(inputs, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunConfiguration;

    fn generator() -> SyntheticTracking {
        let config = RunConfiguration::default();
        SyntheticTracking::new(config.data.search, config.data.template)
    }

    #[test]
    fn boxes_stay_inside_the_search_region() {
        let ds = generator().generate(200, 6, 1).unwrap();
        let batch = ds.batch(&(0..ds.len()).collect::<Vec<_>>());

        for row in batch.targets.rows() {
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            assert!(w > 0. && h > 0.);
            assert!(cx - w / 2. >= -1e-6 && cx + w / 2. <= 1. + 1e-6);
            assert!(cy - h / 2. >= -1e-6 && cy + h / 2. <= 1. + 1e-6);
        }
    }

    #[test]
    fn equal_seeds_give_equal_datasets() {
        let a = generator().generate(20, 5, 3).unwrap();
        let b = generator().generate(20, 5, 3).unwrap();
        let c = generator().generate(20, 5, 4).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn too_few_features_fail() {
        assert!(generator().generate(1, 3, 0).is_err());
    }
}

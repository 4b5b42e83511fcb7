use rand::RngCore;
use rand_distr::{Distribution, Uniform};

use super::ParamGen;
use crate::{MlErr, Result};

/// A parameter generator that follows a certain probabilistic distribution.
pub struct RandParamGen<D: Distribution<f32>> {
    distribution: D,
    remaining: usize,
}

impl<D: Distribution<f32>> RandParamGen<D> {
    /// Creates a new `RandParamGen` parameter generator.
    ///
    /// # Arguments
    /// * `distribution` - The distribution to sample the random numbers from.
    /// * `limit` - The maximum amount of numbers to generate.
    pub fn new(distribution: D, limit: usize) -> Self {
        Self {
            distribution,
            remaining: limit,
        }
    }
}

impl RandParamGen<Uniform<f32>> {
    /// Creates a new `RandParamGen` parameter generator with a uniform distribution.
    ///
    /// # Arguments
    /// * `limit` - The maximum amount of numbers to generate.
    /// * `low` - The inclusive lower limit.
    /// * `high` - The exclusive upper limit.
    ///
    /// # Returns
    /// An error if the range is invalid (low >= high).
    pub fn uniform(limit: usize, low: f32, high: f32) -> Result<Self> {
        let distribution =
            Uniform::new(low, high).map_err(|e| MlErr::InvalidInit(e.to_string()))?;
        Ok(Self::new(distribution, limit))
    }

    /// Creates a new `RandParamGen` parameter generator using Xavier uniform initialization.
    ///
    /// # Arguments
    /// * `limit` - The maximum amount of numbers to generate.
    /// * `fan_in` - The number of input units in the weight tensor.
    /// * `fan_out` - The number of output units in the weight tensor.
    ///
    /// # Returns
    /// An error if the calculated range is invalid.
    pub fn xavier_uniform(limit: usize, fan_in: usize, fan_out: usize) -> Result<Self> {
        let range = (6. / (fan_in + fan_out) as f32).sqrt();
        Self::uniform(limit, -range, range)
    }
}

impl<D: Distribution<f32>> ParamGen for RandParamGen<D> {
    fn sample(&mut self, rng: &mut dyn RngCore, mut n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 {
            return None;
        }

        n = n.min(self.remaining);
        self.remaining -= n;

        let sample = (0..n).map(|_| self.distribution.sample(rng)).collect();
        Some(sample)
    }
}

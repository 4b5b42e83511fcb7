use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{Model, activations::ActFn, layers::Dense};
use crate::{
    MlErr, Result,
    initialization::{ConstParamGen, ParamGen, RandParamGen},
};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Dense>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Dense>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// Builds a box regression head: `input_dim → hidden_dims… → 5`.
    ///
    /// Hidden layers use ReLU, the output layer a sigmoid so the normalized `(cx, cy, w, h)` box and
    /// the IoU score all land in `(0, 1)`.
    ///
    /// # Arguments
    /// * `input_dim` - The size of each input feature vector.
    /// * `hidden_dims` - The output size of each hidden layer.
    ///
    /// # Returns
    /// A new `Sequential` instance or an error if some dimension is zero.
    pub fn box_head(input_dim: usize, hidden_dims: &[usize]) -> Result<Self> {
        if input_dim == 0 || hidden_dims.contains(&0) {
            return Err(MlErr::InvalidInit(format!(
                "layer dimensions must be positive, got input {input_dim} and hidden {hidden_dims:?}"
            )));
        }

        let mut layers = Vec::with_capacity(hidden_dims.len() + 1);
        let mut n = input_dim;

        for &m in hidden_dims {
            layers.push(Dense::new((n, m), Some(ActFn::relu())));
            n = m;
        }

        layers.push(Dense::new((n, BOX_HEAD_OUTPUTS), Some(ActFn::sigmoid(1.0))));
        Ok(Self::new(layers))
    }

    /// Samples an initial parameter vector: Xavier uniform weights and zero biases.
    ///
    /// # Arguments
    /// * `rng` - The random number generator, seed it to get identical replicas.
    pub fn init_params<R: Rng>(&self, rng: &mut R) -> Result<Vec<f32>> {
        let mut params = Vec::with_capacity(self.size());

        for layer in &self.layers {
            let (n, m) = layer.dim();
            let mut weights = RandParamGen::xavier_uniform(n * m, n, m)?;
            let mut biases = ConstParamGen::new(0.0, m);

            params.extend(weights.sample(&mut *rng, n * m).unwrap_or_default());
            params.extend(biases.sample(&mut *rng, m).unwrap_or_default());
        }

        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "initial parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        Ok(params)
    }

    /// Returns the output size of the model.
    pub fn output_dim(&self) -> usize {
        self.layers.last().map(|l| l.dim().1).unwrap_or_default()
    }
}

/// `(cx, cy, w, h, iou_score)`
pub const BOX_HEAD_OUTPUTS: usize = 5;

impl Model for Sequential {
    fn size(&self) -> usize {
        self.layers.iter().map(|layer| layer.size()).sum()
    }

    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_params("model parameters", params.len())?;

        let mut offset = 0;
        let mut a = x.to_owned();

        for layer in self.layers.iter_mut() {
            let size = layer.size();
            a = layer.forward(&params[offset..offset + size], a.view())?;
            offset += size;
        }

        Ok(a)
    }

    fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array2<f32>) -> Result<()> {
        self.check_params("model parameters", params.len())?;
        self.check_params("model gradient", grad.len())?;

        let mut end = params.len();
        let mut d = d;

        for layer in self.layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(())
    }
}

impl Sequential {
    fn check_params(&self, what: &'static str, got: usize) -> Result<()> {
        let expected = self.size();

        if got != expected {
            return Err(MlErr::SizeMismatch {
                what,
                got,
                expected,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn box_head_outputs_five_values_in_unit_range() {
        let mut model = Sequential::box_head(4, &[8, 6]).unwrap();
        let params = model.init_params(&mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(params.len(), model.size());
        assert_eq!(model.output_dim(), BOX_HEAD_OUTPUTS);

        let x = array![[0.1_f32, 0.2, 0.3, 0.4], [0.5, 0.5, 0.2, 0.2]];
        let y = model.forward(&params, x.view()).unwrap();

        assert_eq!(y.dim(), (2, BOX_HEAD_OUTPUTS));
        assert!(y.iter().all(|v| *v > 0.0 && *v < 1.0));
    }

    #[test]
    fn seeded_init_is_reproducible() {
        let model = Sequential::box_head(3, &[4]).unwrap();
        let a = model.init_params(&mut StdRng::seed_from_u64(9)).unwrap();
        let b = model.init_params(&mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn backward_matches_finite_difference() {
        let mut model = Sequential::box_head(3, &[4]).unwrap();
        let params = model.init_params(&mut StdRng::seed_from_u64(3)).unwrap();
        let x = array![[0.3_f32, -0.2, 0.8], [0.1, 0.9, -0.5]];

        let y = model.forward(&params, x.view()).unwrap();
        let mut grad = vec![0.0; model.size()];
        model.backward(&params, &mut grad, Array2::ones(y.dim())).unwrap();

        let h = 1e-2;
        for i in 0..params.len() {
            let mut plus = params.clone();
            let mut minus = params.clone();
            plus[i] += h;
            minus[i] -= h;

            let up = model.forward(&plus, x.view()).unwrap().sum();
            let down = model.forward(&minus, x.view()).unwrap().sum();
            let numeric = (up - down) / (2. * h);
            assert!((numeric - grad[i]).abs() < 2e-2, "param {i}");
        }
    }

    #[test]
    fn rejects_zero_sized_layers() {
        assert!(Sequential::box_head(0, &[4]).is_err());
        assert!(Sequential::box_head(4, &[0]).is_err());
    }
}

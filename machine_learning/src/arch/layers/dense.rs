use ndarray::prelude::*;

use crate::{MlErr, Result, arch::activations::ActFn};

/// A fully connected layer, `a = act_fn(x · W + b)`.
///
/// The layer's parameter slice holds the `(n, m)` weights in row major order followed by the `m`
/// biases.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Array2<f32>,
    z: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The input and output dimensions of the layer.
    /// * `act_fn` - An optional activation function.
    ///
    /// # Returns
    /// A new `Dense` instance.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
            x: Array2::zeros((0, dim.0)),
            z: Array2::zeros((0, dim.1)),
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the input and output dimensions of this layer.
    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense layer input",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(params)?;
        let mut z = x.dot(&w);
        z += &b;

        self.x = x.to_owned();

        let a = match &self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        self.z = z;
        Ok(a)
    }

    /// Writes this layer's gradient into `grad` and returns the delta for the previous layer.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if d.dim() != self.z.dim() {
            return Err(MlErr::SizeMismatch {
                what: "dense layer delta",
                got: d.len(),
                expected: self.z.len(),
            });
        }

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        dw.assign(&self.x.t().dot(&d));
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        self.check_len("dense layer gradient", grad.len())?;

        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw).map_err(|_| self.mismatch(w_size))?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw).map_err(|_| self.mismatch(w_size))?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        self.check_len("dense layer parameters", params.len())?;

        let w_size = self.size - self.dim.1;
        let weights =
            ArrayView2::from_shape(self.dim, &params[..w_size]).map_err(|_| self.mismatch(w_size))?;
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..])
            .map_err(|_| self.mismatch(w_size))?;
        Ok((weights, biases))
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        if got != self.size {
            return Err(MlErr::SizeMismatch {
                what,
                got,
                expected: self.size,
            });
        }

        Ok(())
    }

    fn mismatch(&self, got: usize) -> MlErr {
        MlErr::SizeMismatch {
            what: "dense layer weights",
            got,
            expected: self.dim.0 * self.dim.1,
        }
    }
}

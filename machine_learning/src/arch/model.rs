use ndarray::{Array2, ArrayView2};

use crate::error::Result;

/// A differentiable function of a flat parameter vector.
///
/// Models don't own their parameters, the caller keeps them in a flat buffer so they can be
/// checkpointed, averaged across replicas and updated by an optimizer without knowing the layout.
pub trait Model: Send + Sync {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Makes a forward pass through the model, caching whatever the backward pass needs.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `x` - The input data, one sample per row.
    ///
    /// # Returns
    /// The model's output for every row of `x`.
    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Propagates the gradient of the loss with respect to the last output backwards.
    ///
    /// # Arguments
    /// * `params` - The same parameters used in the last `forward` call.
    /// * `grad` - Where the gradient with respect to `params` is written to.
    /// * `d` - The gradient of the loss with respect to the last output.
    fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array2<f32>) -> Result<()>;
}

/// A model bundled with its parameters, the view an `Actor` has of the network.
pub trait Network {
    /// Makes a forward pass using the bundled parameters.
    fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Computes the gradient of the bundled parameters given the gradient of the last output.
    fn backward(&mut self, d: Array2<f32>) -> Result<()>;
}

use ndarray::{Array2, ArrayView2};

/// A differentiable scalar loss.
///
/// Box losses receive the whole network output as `y_pred` and the `(cx, cy, w, h)` targets as
/// `y`, each one picks the columns it cares about and returns a gradient shaped like `y_pred`.
pub trait LossFn: Send + Sync {
    /// Computes the loss value.
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32;

    /// Computes the gradient of the loss with respect to `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;
}

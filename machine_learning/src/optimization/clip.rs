/// Rescales `grad` in place so its L2 norm is at most `max_norm`.
///
/// # Arguments
/// * `grad` - The gradient to clip.
/// * `max_norm` - The largest norm allowed.
///
/// # Returns
/// The norm of the gradient before clipping.
pub fn clip_grad_norm(grad: &mut [f32], max_norm: f32) -> f32 {
    let norm = grad.iter().map(|g| g * g).sum::<f32>().sqrt();
    let coef = max_norm / (norm + 1e-6);

    if coef < 1. {
        grad.iter_mut().for_each(|g| *g *= coef);
    }

    norm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_gradients_are_scaled_down() {
        let mut grad = [3.0, 4.0];
        let norm = clip_grad_norm(&mut grad, 1.0);

        assert_eq!(norm, 5.0);
        assert!((grad[0] - 0.6).abs() < 1e-5);
        assert!((grad[1] - 0.8).abs() < 1e-5);
    }

    #[test]
    fn small_gradients_are_untouched() {
        let mut grad = [0.03, 0.04];
        clip_grad_norm(&mut grad, 1.0);
        assert_eq!(grad, [0.03, 0.04]);
    }
}

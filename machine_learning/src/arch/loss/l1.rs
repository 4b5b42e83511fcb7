use ndarray::{Array2, ArrayView2, s};

use super::LossFn;
use crate::arch::boxes;

/// Mean absolute error between the corners of the predicted and target boxes.
#[derive(Debug, Default, Clone, Copy)]
pub struct L1;

impl LossFn for L1 {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let pred = boxes::cxcywh_to_xyxy(boxes::box_columns(y_pred));
        let target = boxes::cxcywh_to_xyxy(y);

        (&pred - &target).mapv(f32::abs).mean().unwrap_or_default()
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let pred = boxes::cxcywh_to_xyxy(boxes::box_columns(y_pred));
        let target = boxes::cxcywh_to_xyxy(y);
        let n = pred.len().max(1) as f32;

        let d_xyxy = (&pred - &target).mapv(|d| if d == 0. { 0. } else { d.signum() / n });

        let mut d = Array2::zeros(y_pred.raw_dim());
        d.slice_mut(s![.., ..4])
            .assign(&boxes::xyxy_grad_to_cxcywh(d_xyxy.view()));
        d
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn zero_for_exact_boxes() {
        let y_pred = array![[0.5_f32, 0.5, 0.2, 0.2, 0.9]];
        let y = array![[0.5_f32, 0.5, 0.2, 0.2]];

        assert_eq!(L1.loss(y_pred.view(), y.view()), 0.);
        assert!(L1.loss_prime(y_pred.view(), y.view()).iter().all(|d| *d == 0.));
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let y_pred = array![[0.45_f32, 0.52, 0.32, 0.18, 0.4], [0.2, 0.7, 0.1, 0.25, 0.6]];
        let y = array![[0.5_f32, 0.5, 0.2, 0.2], [0.3, 0.6, 0.15, 0.2]];

        let d = L1.loss_prime(y_pred.view(), y.view());
        let h = 1e-3;

        for i in 0..2 {
            for k in 0..5 {
                let mut plus = y_pred.clone();
                let mut minus = y_pred.clone();
                plus[[i, k]] += h;
                minus[[i, k]] -= h;

                let numeric =
                    (L1.loss(plus.view(), y.view()) - L1.loss(minus.view(), y.view())) / (2. * h);
                assert!((numeric - d[[i, k]]).abs() < 1e-2, "row {i} col {k}");
            }
        }
    }
}

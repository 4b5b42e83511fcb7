use ndarray::{Array2, ArrayView2, s};

use super::LossFn;
use crate::arch::boxes;

/// Generalized IoU loss, `mean(1 - giou)` over the predicted boxes.
#[derive(Debug, Default, Clone, Copy)]
pub struct GIoU;

impl LossFn for GIoU {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let pred = boxes::cxcywh_to_xyxy(boxes::box_columns(y_pred));
        let target = boxes::cxcywh_to_xyxy(y);
        let (giou, _) = boxes::giou_with_grad(pred.view(), target.view());

        1. - boxes::mean(&giou)
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let pred = boxes::cxcywh_to_xyxy(boxes::box_columns(y_pred));
        let target = boxes::cxcywh_to_xyxy(y);
        let (_, d_giou) = boxes::giou_with_grad(pred.view(), target.view());

        let n = pred.nrows().max(1) as f32;
        let d_xyxy = d_giou.mapv(|d| -d / n);

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
    fn perfect_prediction_has_no_loss() {
        let y_pred = array![[0.5_f32, 0.4, 0.3, 0.2, 1.0]];
        let y = array![[0.5_f32, 0.4, 0.3, 0.2]];

        assert!(GIoU.loss(y_pred.view(), y.view()).abs() < 1e-6);
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let y_pred = array![[0.45_f32, 0.42, 0.3, 0.28, 0.5], [0.62, 0.3, 0.2, 0.1, 0.5]];
        let y = array![[0.5_f32, 0.5, 0.25, 0.2], [0.35, 0.55, 0.3, 0.2]];

        let d = GIoU.loss_prime(y_pred.view(), y.view());
        let h = 1e-3;

        for i in 0..2 {
            for k in 0..5 {
                let mut plus = y_pred.clone();
                let mut minus = y_pred.clone();
                plus[[i, k]] += h;
                minus[[i, k]] -= h;

                let numeric = (GIoU.loss(plus.view(), y.view())
                    - GIoU.loss(minus.view(), y.view()))
                    / (2. * h);
                assert!(
                    (numeric - d[[i, k]]).abs() < 1e-2,
                    "row {i} col {k}: numeric {numeric} analytic {}",
                    d[[i, k]]
                );
            }
        }
    }
}

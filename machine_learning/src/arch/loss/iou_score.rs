use ndarray::{Array2, ArrayView2, Axis, s};

use super::{LossFn, Mse};
use crate::arch::boxes;

/// Regresses the predicted IoU score towards the actual IoU of the predicted box.
///
/// The actual IoU is treated as a constant, only the score column receives a gradient.
#[derive(Debug, Default, Clone, Copy)]
pub struct IoUScore;

impl IoUScore {
    fn actual_iou(y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let pred = boxes::cxcywh_to_xyxy(boxes::box_columns(y_pred));
        let target = boxes::cxcywh_to_xyxy(y);
        let iou = boxes::iou(pred.view(), target.view());

        iou.insert_axis(Axis(1))
    }
}

impl LossFn for IoUScore {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let iou = Self::actual_iou(y_pred, y);
        Mse.loss(boxes::score_column(y_pred), iou.view())
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let iou = Self::actual_iou(y_pred, y);
        let d_score = Mse.loss_prime(boxes::score_column(y_pred), iou.view());

        let mut d = Array2::zeros(y_pred.raw_dim());
        d.slice_mut(s![.., 4..5]).assign(&d_score);
        d
    }
}

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView2};

use super::{Batch, Objective};
use crate::{
    MlErr, Result,
    arch::{BOX_HEAD_OUTPUTS, Network, boxes},
};

/// Static knobs of an `Actor`.
#[derive(Debug, Clone, Copy)]
pub struct ActorSettings {
    /// The side of the search region in pixels, used to report box errors in pixels.
    pub search_size: usize,
}

/// What an `Actor` computes for a single batch.
#[derive(Debug, Clone)]
pub struct LossOutput {
    /// The weighted sum of every loss term.
    pub total: f32,
    /// The unweighted value of each loss term, non finite values are kept as they are.
    pub breakdown: BTreeMap<String, f32>,
    /// Values worth logging: `Loss/total`, `Loss/<term>`, `IoU` and `Box/center_err_px`.
    pub stats: BTreeMap<String, f32>,
    /// The gradient of `total` with respect to the network output.
    pub d_output: Array2<f32>,
}

impl LossOutput {
    /// Returns the terms (or `total`) whose value is not finite.
    pub fn non_finite_terms(&self) -> Vec<&str> {
        let mut terms: Vec<_> = self
            .breakdown
            .iter()
            .filter(|(_, v)| !v.is_finite())
            .map(|(name, _)| name.as_str())
            .collect();

        if terms.is_empty() && !self.total.is_finite() {
            terms.push("total");
        }

        terms
    }

    pub fn is_finite(&self) -> bool {
        self.non_finite_terms().is_empty()
    }
}

/// Runs the network on a batch and scores its predictions with an `Objective`.
///
/// The actor never touches checkpoints, schedules nor the data source.
pub struct Actor<N: Network> {
    net: N,
    objective: Objective,
    settings: ActorSettings,
}

impl<N: Network> Actor<N> {
    /// Creates a new `Actor`.
    ///
    /// # Arguments
    /// * `net` - The network the actor drives.
    /// * `objective` - The loss terms and their weights.
    /// * `settings` - The actor's settings.
    ///
    /// # Returns
    /// A new `Actor` or an `InvalidObjective` error if the objective's loss and weight keys
    /// differ or some weight is invalid.
    pub fn new(net: N, objective: Objective, settings: ActorSettings) -> Result<Self> {
        objective.validate()?;

        Ok(Self {
            net,
            objective,
            settings,
        })
    }

    /// Computes the loss of a batch.
    ///
    /// # Arguments
    /// * `batch` - The batch to score.
    ///
    /// # Returns
    /// The total loss, its breakdown, the stats and the gradient of the network output, or an error
    /// if the batch or the network output are malformed.
    pub fn compute_loss(&mut self, batch: &Batch) -> Result<LossOutput> {
        if batch.targets.dim() != (batch.inputs.nrows(), 4) {
            return Err(MlErr::SizeMismatch {
                what: "batch targets",
                got: batch.targets.len(),
                expected: batch.inputs.nrows() * 4,
            });
        }

        let output = self.net.forward(batch.inputs.view())?;

        if output.ncols() != BOX_HEAD_OUTPUTS {
            return Err(MlErr::SizeMismatch {
                what: "network output columns",
                got: output.ncols(),
                expected: BOX_HEAD_OUTPUTS,
            });
        }

        let mut total = 0.;
        let mut breakdown = BTreeMap::new();
        let mut stats = BTreeMap::new();
        let mut d_output = Array2::zeros(output.raw_dim());

        for (name, loss_fn, weight) in self.objective.terms() {
            let loss = loss_fn.loss(output.view(), batch.targets.view());
            let d = loss_fn.loss_prime(output.view(), batch.targets.view());

            total += weight * loss;
            d_output.scaled_add(weight, &d);
            breakdown.insert(name.to_string(), loss);
            stats.insert(format!("Loss/{name}"), loss);
        }

        let pred = boxes::cxcywh_to_xyxy(boxes::box_columns(output.view()));
        let target = boxes::cxcywh_to_xyxy(batch.targets.view());
        let iou = boxes::iou(pred.view(), target.view());

        stats.insert("Loss/total".to_string(), total);
        stats.insert("IoU".to_string(), boxes::mean(&iou));
        stats.insert(
            "Box/center_err_px".to_string(),
            self.center_error_px(output.view(), batch),
        );

        Ok(LossOutput {
            total,
            breakdown,
            stats,
            d_output,
        })
    }

    /// Pushes the gradient of a previous `compute_loss` back through the network.
    pub fn backward(&mut self, output: &LossOutput) -> Result<()> {
        self.net.backward(output.d_output.clone())
    }

    pub fn net(&self) -> &N {
        &self.net
    }

    pub fn net_mut(&mut self) -> &mut N {
        &mut self.net
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    fn center_error_px(&self, output: ArrayView2<f32>, batch: &Batch) -> f32 {
        let size = self.settings.search_size as f32;
        let n = batch.len().max(1) as f32;

        output
            .outer_iter()
            .zip(batch.targets.outer_iter())
            .map(|(p, t)| ((p[0] - t[0]).powi(2) + (p[1] - t[1]).powi(2)).sqrt() * size)
            .sum::<f32>()
            / n
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::arch::loss::{GIoU, IoUScore, L1};

    /// Echoes a fixed output and records the last gradient it got.
    struct FixedNet {
        output: Array2<f32>,
        last_grad: Option<Array2<f32>>,
    }

    impl Network for FixedNet {
        fn forward(&mut self, _x: ArrayView2<f32>) -> Result<Array2<f32>> {
            Ok(self.output.clone())
        }

        fn backward(&mut self, d: Array2<f32>) -> Result<()> {
            self.last_grad = Some(d);
            Ok(())
        }
    }

    fn objective(giou: f32, l1: f32, iou: f32) -> Objective {
        Objective::new()
            .with_loss("giou", GIoU)
            .with_loss("l1", L1)
            .with_loss("iou", IoUScore)
            .with_weight("giou", giou)
            .with_weight("l1", l1)
            .with_weight("iou", iou)
    }

    fn net(output: Array2<f32>) -> FixedNet {
        FixedNet {
            output,
            last_grad: None,
        }
    }

    const SETTINGS: ActorSettings = ActorSettings { search_size: 320 };

    #[test]
    fn total_is_the_weighted_sum() {
        let output = array![[0.45_f32, 0.5, 0.3, 0.2, 0.4], [0.5, 0.52, 0.2, 0.25, 0.7]];
        let batch = Batch::new(
            Array2::zeros((2, 3)),
            array![[0.5_f32, 0.5, 0.25, 0.2], [0.5, 0.5, 0.2, 0.2]],
        );

        let mut actor = Actor::new(net(output), objective(2.0, 5.0, 1.0), SETTINGS).unwrap();
        let out = actor.compute_loss(&batch).unwrap();

        let expected =
            2.0 * out.breakdown["giou"] + 5.0 * out.breakdown["l1"] + out.breakdown["iou"];
        assert!((out.total - expected).abs() < 1e-6);
        assert_eq!(out.stats["Loss/total"], out.total);
        assert!(out.stats.contains_key("IoU"));
        assert!(out.is_finite());

        actor.backward(&out).unwrap();
        assert_eq!(actor.net().last_grad.as_ref(), Some(&out.d_output));
    }

    #[test]
    fn mismatched_keys_fail_construction() {
        let objective = Objective::new()
            .with_loss("giou", GIoU)
            .with_weight("giou", 1.0)
            .with_weight("l1", 1.0);

        let result = Actor::new(net(Array2::zeros((1, 5))), objective, SETTINGS);
        assert!(matches!(result, Err(MlErr::InvalidObjective { .. })));
    }

    #[test]
    fn non_finite_terms_are_reported_not_clamped() {
        // A zero sized box against a zero sized target has no union.
        let output = array![[0.5_f32, 0.5, 0.0, 0.0, 0.5]];
        let batch = Batch::new(Array2::zeros((1, 3)), array![[0.5_f32, 0.5, 0.0, 0.0]]);

        let mut actor = Actor::new(net(output), objective(2.0, 5.0, 1.0), SETTINGS).unwrap();
        let out = actor.compute_loss(&batch).unwrap();

        assert!(!out.breakdown["giou"].is_finite());
        assert!(out.non_finite_terms().contains(&"giou"));
        assert!(!out.is_finite());
    }

    #[test]
    fn malformed_targets_are_rejected() {
        let batch = Batch::new(Array2::zeros((2, 3)), Array2::zeros((2, 3)));
        let mut actor =
            Actor::new(net(Array2::zeros((2, 5))), objective(1.0, 1.0, 1.0), SETTINGS).unwrap();

        assert!(actor.compute_loss(&batch).is_err());
    }
}

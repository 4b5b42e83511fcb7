use super::{Optimizer, OptimizerState, check_len};
use crate::{MlErr, Result};

/// How the weight decay penalty enters the update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightDecay {
    /// Added to the gradient before the moments are updated (classic Adam).
    L2(f32),
    /// Applied directly on the parameters, outside the adaptive step (AdamW).
    Decoupled(f32),
}

#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
    weight_decay: WeightDecay,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    /// * `weight_decay` - The weight decay penalty and the way it's applied.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(
        len: usize,
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        weight_decay: WeightDecay,
    ) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon,
            weight_decay,
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len("gradient", grad.len(), params.len())?;
        check_len("adam moments", self.v.len(), params.len())?;

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            weight_decay,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        let (l2, decoupled) = match weight_decay {
            WeightDecay::L2(wd) => (wd, 0.),
            WeightDecay::Decoupled(wd) => (0., wd),
        };

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                let g = g + l2 * *p;
                *p -= lr * decoupled * *p;
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps);
            });

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::Adam {
            learning_rate: self.learning_rate,
            beta1_t: self.beta1_t,
            beta2_t: self.beta2_t,
            v: self.v.to_vec(),
            s: self.s.to_vec(),
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        match state {
            OptimizerState::Adam {
                learning_rate,
                beta1_t,
                beta2_t,
                v,
                s,
            } => {
                check_len("adam first moment", v.len(), self.v.len())?;
                check_len("adam second moment", s.len(), self.s.len())?;

                self.learning_rate = learning_rate;
                self.beta1_t = beta1_t;
                self.beta2_t = beta2_t;
                self.v = v.into_boxed_slice();
                self.s = s.into_boxed_slice();
                Ok(())
            }
            other => Err(MlErr::InvalidOptimizerState {
                expected: "adam",
                got: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_learning_rate() {
        let mut optimizer = Adam::new(2, 0.1, 0.9, 0.999, 1e-8, WeightDecay::L2(0.));
        let mut params = [1.0, 1.0];

        optimizer.update_params(&[3.0, -0.5], &mut params).unwrap();

        assert!((params[0] - 0.9).abs() < 1e-4);
        assert!((params[1] - 1.1).abs() < 1e-4);
    }

    #[test]
    fn decoupled_decay_shrinks_params_without_gradient() {
        let mut optimizer = Adam::new(1, 0.1, 0.9, 0.999, 1e-8, WeightDecay::Decoupled(0.5));
        let mut params = [2.0];

        optimizer.update_params(&[0.0], &mut params).unwrap();
        assert!((params[0] - 1.9).abs() < 1e-6);
    }

    #[test]
    fn resumed_optimizer_continues_identically() {
        let grads = [[0.3, -0.2], [0.1, 0.4], [-0.5, 0.2]];

        let mut reference = Adam::new(2, 0.01, 0.9, 0.999, 1e-8, WeightDecay::Decoupled(1e-2));
        let mut expected = [0.5, -0.5];
        for g in &grads {
            reference.update_params(g, &mut expected).unwrap();
        }

        let mut first = Adam::new(2, 0.01, 0.9, 0.999, 1e-8, WeightDecay::Decoupled(1e-2));
        let mut params = [0.5, -0.5];
        first.update_params(&grads[0], &mut params).unwrap();

        let mut resumed = Adam::new(2, 0.5, 0.9, 0.999, 1e-8, WeightDecay::Decoupled(1e-2));
        resumed.load_state(first.state()).unwrap();
        for g in &grads[1..] {
            resumed.update_params(g, &mut params).unwrap();
        }

        assert_eq!(params, expected);
    }

    #[test]
    fn rejects_foreign_or_resized_state() {
        let mut optimizer = Adam::new(2, 0.1, 0.9, 0.999, 1e-8, WeightDecay::L2(0.));

        let foreign = OptimizerState::GradientDescent { learning_rate: 0.1 };
        assert!(optimizer.load_state(foreign).is_err());

        let resized = Adam::new(3, 0.1, 0.9, 0.999, 1e-8, WeightDecay::L2(0.)).state();
        assert!(optimizer.load_state(resized).is_err());
    }
}

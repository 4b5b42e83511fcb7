use super::{Optimizer, OptimizerState, check_len};
use crate::{MlErr, Result};

#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    learning_rate: f32,
    momentum: f32,
    weight_decay: f32,
    velocity: Box<[f32]>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    /// * `weight_decay` - The L2 penalty added to the gradient.
    ///
    /// # Returns
    /// A new `GradientDescentWithMomentum` instance.
    pub fn new(len: usize, learning_rate: f32, momentum: f32, weight_decay: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            weight_decay,
            velocity: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len("gradient", grad.len(), params.len())?;
        check_len("momentum velocity", self.velocity.len(), params.len())?;

        let lr = self.learning_rate;
        let mu = self.momentum;
        let wd = self.weight_decay;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.velocity.iter_mut())
            .for_each(|((p, g), v)| {
                *v = (mu * *v) + g + wd * *p;
                *p -= lr * *v;
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
        OptimizerState::Momentum {
            learning_rate: self.learning_rate,
            velocity: self.velocity.to_vec(),
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        match state {
            OptimizerState::Momentum {
                learning_rate,
                velocity,
            } => {
                check_len("momentum velocity", velocity.len(), self.velocity.len())?;
                self.learning_rate = learning_rate;
                self.velocity = velocity.into_boxed_slice();
                Ok(())
            }
            other => Err(MlErr::InvalidOptimizerState {
                expected: "momentum",
                got: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_accumulates() {
        let mut optimizer = GradientDescentWithMomentum::new(1, 1.0, 0.5, 0.);
        let mut params = [0.0];

        optimizer.update_params(&[1.0], &mut params).unwrap();
        assert_eq!(params, [-1.0]);

        optimizer.update_params(&[1.0], &mut params).unwrap();
        assert_eq!(params, [-2.5]);
    }

    #[test]
    fn restores_its_own_state_only() {
        let mut optimizer = GradientDescentWithMomentum::new(2, 0.1, 0.9, 0.);
        let mut params = [1.0, 1.0];
        optimizer.update_params(&[1.0, 2.0], &mut params).unwrap();

        let mut restored = GradientDescentWithMomentum::new(2, 0.1, 0.9, 0.);
        restored.load_state(optimizer.state()).unwrap();
        assert_eq!(restored.state(), optimizer.state());

        let foreign = OptimizerState::GradientDescent { learning_rate: 0.1 };
        assert!(restored.load_state(foreign).is_err());
    }
}

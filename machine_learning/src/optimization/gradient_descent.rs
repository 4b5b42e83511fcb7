use super::{Optimizer, OptimizerState, check_len};
use crate::{MlErr, Result};

/// Gradient descent optimization algorithm, with optional L2 weight decay.
#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f32,
    weight_decay: f32,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The *length* of the steps taken on `update_params`.
    /// * `weight_decay` - The L2 penalty added to the gradient, `0` disables it.
    ///
    /// # Returns
    /// A new `GradientDescent` instance.
    pub fn new(learning_rate: f32, weight_decay: f32) -> Self {
        Self {
            learning_rate,
            weight_decay,
        }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len("gradient", grad.len(), params.len())?;

        let lr = self.learning_rate;
        let wd = self.weight_decay;

        for (p, g) in params.iter_mut().zip(grad) {
            *p -= lr * (g + wd * *p);
        }

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::GradientDescent {
            learning_rate: self.learning_rate,
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        match state {
            OptimizerState::GradientDescent { learning_rate } => {
                self.learning_rate = learning_rate;
                Ok(())
            }
            other => Err(MlErr::InvalidOptimizerState {
                expected: "gradient descent",
                got: other.kind(),
            }),
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::Result;

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer: Send + Sync {
    /// Updates the provided slice of parameters using the gradient.
    ///
    /// # Arguments
    /// * `grad` - A reference to the model's gradient.
    /// * `params` - The parameters to update.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad` and `params`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    /// The learning rate used by the next update.
    fn learning_rate(&self) -> f32;

    /// Overrides the learning rate, schedulers drive it through this method.
    fn set_learning_rate(&mut self, learning_rate: f32);

    /// Takes a snapshot of the optimizer's internal state.
    fn state(&self) -> OptimizerState;

    /// Restores a snapshot taken by `state`.
    ///
    /// # Returns
    /// An error if the snapshot belongs to a different algorithm or a different amount of
    /// parameters.
    fn load_state(&mut self, state: OptimizerState) -> Result<()>;
}

/// A serializable snapshot of an optimizer, stored inside checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerState {
    GradientDescent {
        learning_rate: f32,
    },
    Momentum {
        learning_rate: f32,
        velocity: Vec<f32>,
    },
    Adam {
        learning_rate: f32,
        beta1_t: f32,
        beta2_t: f32,
        v: Vec<f32>,
        s: Vec<f32>,
    },
}

impl OptimizerState {
    /// The name of the algorithm this state belongs to.
    pub fn kind(&self) -> &'static str {
        match self {
            OptimizerState::GradientDescent { .. } => "gradient descent",
            OptimizerState::Momentum { .. } => "momentum",
            OptimizerState::Adam { .. } => "adam",
        }
    }
}

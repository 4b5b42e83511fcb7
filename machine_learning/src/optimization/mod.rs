mod adam;
mod clip;
mod gradient_descent;
mod gradient_descent_with_momentum;
mod optimizer;
mod schedule;

pub use adam::{Adam, WeightDecay};
pub use clip::clip_grad_norm;
pub use gradient_descent::GradientDescent;
pub use gradient_descent_with_momentum::GradientDescentWithMomentum;
pub use optimizer::{Optimizer, OptimizerState};
pub use schedule::{ConstantLr, LrScheduler, MultiStepLr, SchedulerState, StepLr};

use crate::{MlErr, Result};

/// Fails with `SizeMismatch` unless `got == expected`.
pub(crate) fn check_len(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(MlErr::SizeMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}

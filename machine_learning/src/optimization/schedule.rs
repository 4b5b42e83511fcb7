use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// Decides the learning rate of every optimizer step.
pub trait LrScheduler: Send + Sync {
    /// The learning rate for the current step.
    fn lr(&self) -> f32;

    /// Advances the schedule by one optimizer step.
    fn step(&mut self);

    /// Takes a snapshot of the schedule's position.
    fn state(&self) -> SchedulerState;

    /// Restores a snapshot taken by `state`.
    fn load_state(&mut self, state: SchedulerState) -> Result<()>;
}

/// A serializable snapshot of a scheduler, stored inside checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerState {
    Constant { step: usize },
    Step { step: usize },
    MultiStep { step: usize },
}

impl SchedulerState {
    /// The name of the schedule this state belongs to.
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerState::Constant { .. } => "constant",
            SchedulerState::Step { .. } => "step",
            SchedulerState::MultiStep { .. } => "multi step",
        }
    }
}

fn mismatch(expected: &'static str, got: &SchedulerState) -> MlErr {
    MlErr::InvalidSchedulerState {
        expected,
        got: got.kind(),
    }
}

/// Keeps the learning rate fixed.
#[derive(Debug)]
pub struct ConstantLr {
    lr: f32,
    step: usize,
}

impl ConstantLr {
    pub fn new(lr: f32) -> Self {
        Self { lr, step: 0 }
    }
}

impl LrScheduler for ConstantLr {
    fn lr(&self) -> f32 {
        self.lr
    }

    fn step(&mut self) {
        self.step += 1;
    }

    fn state(&self) -> SchedulerState {
        SchedulerState::Constant { step: self.step }
    }

    fn load_state(&mut self, state: SchedulerState) -> Result<()> {
        match state {
            SchedulerState::Constant { step } => {
                self.step = step;
                Ok(())
            }
            other => Err(mismatch("constant", &other)),
        }
    }
}

/// Multiplies the learning rate by `gamma` every `step_size` steps.
#[derive(Debug)]
pub struct StepLr {
    base_lr: f32,
    step_size: usize,
    gamma: f32,
    step: usize,
}

impl StepLr {
    /// Creates a new `StepLr` scheduler.
    ///
    /// # Arguments
    /// * `base_lr` - The learning rate before the first drop.
    /// * `step_size` - The amount of steps between drops, `0` never drops.
    /// * `gamma` - The multiplicative decay applied on each drop.
    pub fn new(base_lr: f32, step_size: usize, gamma: f32) -> Self {
        Self {
            base_lr,
            step_size,
            gamma,
            step: 0,
        }
    }
}

impl LrScheduler for StepLr {
    fn lr(&self) -> f32 {
        let drops = self.step.checked_div(self.step_size).unwrap_or(0);
        self.base_lr * self.gamma.powi(drops as i32)
    }

    fn step(&mut self) {
        self.step += 1;
    }

    fn state(&self) -> SchedulerState {
        SchedulerState::Step { step: self.step }
    }

    fn load_state(&mut self, state: SchedulerState) -> Result<()> {
        match state {
            SchedulerState::Step { step } => {
                self.step = step;
                Ok(())
            }
            other => Err(mismatch("step", &other)),
        }
    }
}

/// Multiplies the learning rate by `gamma` once the step count reaches each milestone.
#[derive(Debug)]
pub struct MultiStepLr {
    base_lr: f32,
    milestones: Vec<usize>,
    gamma: f32,
    step: usize,
}

impl MultiStepLr {
    /// Creates a new `MultiStepLr` scheduler.
    ///
    /// # Arguments
    /// * `base_lr` - The learning rate before the first milestone.
    /// * `milestones` - The steps where the learning rate drops, in any order.
    /// * `gamma` - The multiplicative decay applied on each milestone.
    pub fn new(base_lr: f32, mut milestones: Vec<usize>, gamma: f32) -> Self {
        milestones.sort_unstable();

        Self {
            base_lr,
            milestones,
            gamma,
            step: 0,
        }
    }
}

impl LrScheduler for MultiStepLr {
    fn lr(&self) -> f32 {
        let drops = self.milestones.partition_point(|&m| m <= self.step);
        self.base_lr * self.gamma.powi(drops as i32)
    }

    fn step(&mut self) {
        self.step += 1;
    }

    fn state(&self) -> SchedulerState {
        SchedulerState::MultiStep { step: self.step }
    }

    fn load_state(&mut self, state: SchedulerState) -> Result<()> {
        match state {
            SchedulerState::MultiStep { step } => {
                self.step = step;
                Ok(())
            }
            other => Err(mismatch("multi step", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lrs(scheduler: &mut dyn LrScheduler, n: usize) -> Vec<f32> {
        (0..n)
            .map(|_| {
                let lr = scheduler.lr();
                scheduler.step();
                lr
            })
            .collect()
    }

    #[test]
    fn step_lr_drops_every_step_size() {
        let mut scheduler = StepLr::new(1.0, 2, 0.5);
        assert_eq!(lrs(&mut scheduler, 5), [1.0, 1.0, 0.5, 0.5, 0.25]);
    }

    #[test]
    fn step_lr_with_zero_step_size_never_drops() {
        let mut scheduler = StepLr::new(1.0, 0, 0.5);
        assert_eq!(lrs(&mut scheduler, 3), [1.0; 3]);
    }

    #[test]
    fn multi_step_lr_drops_at_milestones() {
        let mut scheduler = MultiStepLr::new(1.0, vec![3, 1], 0.1);
        let got = lrs(&mut scheduler, 4);
        let expected = [1.0, 0.1, 0.1, 0.01];

        assert!(got.iter().zip(expected).all(|(a, b)| (a - b).abs() < 1e-7));
    }

    #[test]
    fn restored_schedule_resumes_in_place() {
        let mut scheduler = StepLr::new(1.0, 2, 0.5);
        lrs(&mut scheduler, 3);

        let mut restored = StepLr::new(1.0, 2, 0.5);
        restored.load_state(scheduler.state()).unwrap();
        assert_eq!(restored.lr(), scheduler.lr());

        let mut constant = ConstantLr::new(1.0);
        assert!(constant.load_state(scheduler.state()).is_err());
    }
}

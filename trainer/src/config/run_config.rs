use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Result, TrainErr};

/// The whole configuration of a training run.
///
/// Built once by merging the defaults with an override file, then shared read only by every
/// component of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub model: ModelConfig,
    pub train: TrainConfig,
    pub data: DataConfig,
    pub dist: DistConfig,
    pub test: TestConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_dim: usize,
    pub hidden_dims: Vec<usize>,
    /// Seeds the parameter initialization, every replica starts from the same parameters.
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adamw,
    Adam,
    Sgd,
    Momentum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Step,
    Mstep,
    Constant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(rename = "type")]
    pub kind: SchedulerKind,
    pub decay_rate: f32,
    /// Epochs where a multi step schedule drops the learning rate.
    pub milestones: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub epoch: usize,
    pub lr: f32,
    pub weight_decay: f32,
    pub batch_size: usize,
    pub optimizer: OptimizerKind,
    pub momentum: f32,
    pub betas: [f32; 2],
    pub eps: f32,
    pub giou_weight: f32,
    pub l1_weight: f32,
    pub iou_weight: f32,
    /// `None` or a non positive value disables clipping.
    pub grad_clip_norm: Option<f32>,
    pub lr_drop_epoch: usize,
    pub scheduler: SchedulerConfig,
    pub print_interval: usize,
    pub checkpoint_interval: usize,
    /// `0` never validates.
    pub val_epoch_interval: usize,
    pub max_steps: Option<usize>,
    pub stop_epoch: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// A CSV file with the samples, `None` generates them.
    pub path: Option<PathBuf>,
    pub samples_per_epoch: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValSplitConfig {
    pub path: Option<PathBuf>,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub size: usize,
    pub factor: f32,
    pub center_jitter: f32,
    pub scale_jitter: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryConfig {
    pub size: usize,
    pub factor: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    pub seed: u64,
    pub train: SplitConfig,
    pub val: ValSplitConfig,
    pub search: SearchConfig,
    pub template: GeometryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistConfig {
    pub world_size: usize,
    pub sync_timeout_secs: u64,
}

/// Parameters of the tracker at inference time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    pub search_factor: f32,
    pub search_size: usize,
    /// The amount of trained epochs of the checkpoint to track with.
    pub epoch: usize,
    pub save_all_boxes: bool,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            model: ModelConfig {
                input_dim: 16,
                hidden_dims: vec![64, 32],
                seed: 42,
            },
            train: TrainConfig {
                epoch: 500,
                lr: 1e-4,
                weight_decay: 1e-4,
                batch_size: 16,
                optimizer: OptimizerKind::Adamw,
                momentum: 0.9,
                betas: [0.9, 0.999],
                eps: 1e-8,
                giou_weight: 2.0,
                l1_weight: 5.0,
                iou_weight: 1.0,
                grad_clip_norm: Some(0.1),
                lr_drop_epoch: 400,
                scheduler: SchedulerConfig {
                    kind: SchedulerKind::Step,
                    decay_rate: 0.1,
                    milestones: Vec::new(),
                },
                print_interval: 50,
                checkpoint_interval: 1,
                val_epoch_interval: 0,
                max_steps: None,
                stop_epoch: None,
            },
            data: DataConfig {
                seed: 7,
                train: SplitConfig {
                    path: None,
                    samples_per_epoch: 60000,
                },
                val: ValSplitConfig {
                    path: None,
                    samples: 0,
                },
                search: SearchConfig {
                    size: 320,
                    factor: 5.0,
                    center_jitter: 4.5,
                    scale_jitter: 0.5,
                },
                template: GeometryConfig {
                    size: 128,
                    factor: 2.0,
                },
            },
            dist: DistConfig {
                world_size: 1,
                sync_timeout_secs: 600,
            },
            test: TestConfig {
                search_factor: 5.0,
                search_size: 320,
                epoch: 500,
                save_all_boxes: false,
            },
        }
    }
}

impl RunConfiguration {
    /// Rejects values no component could be built from.
    ///
    /// # Returns
    /// An `InvalidConfig` error describing the first offending value.
    pub fn validate(&self) -> Result<()> {
        let Self {
            model,
            train,
            data,
            dist,
            test,
        } = self;

        if model.input_dim < 4 {
            return invalid(format!(
                "model.input_dim must be at least 4, got {}",
                model.input_dim
            ));
        }
        if model.hidden_dims.contains(&0) {
            return invalid("model.hidden_dims entries must be positive".into());
        }

        if train.epoch == 0 {
            return invalid("train.epoch must be positive".into());
        }
        if train.batch_size == 0 {
            return invalid("train.batch_size must be positive".into());
        }
        if !(train.lr.is_finite() && train.lr > 0.) {
            return invalid(format!("train.lr must be positive, got {}", train.lr));
        }
        if train.betas.iter().any(|b| !(0. ..1.).contains(b)) {
            return invalid(format!("train.betas must be in [0, 1), got {:?}", train.betas));
        }
        if train.print_interval == 0 {
            return invalid("train.print_interval must be positive".into());
        }
        if train.checkpoint_interval == 0 {
            return invalid("train.checkpoint_interval must be positive".into());
        }

        if data.train.path.is_none() && data.train.samples_per_epoch == 0 {
            return invalid("data.train.samples_per_epoch must be positive".into());
        }
        if !(data.search.factor > 0. && data.template.factor > 0.) {
            return invalid("data search and template factors must be positive".into());
        }
        if data.search.size == 0 || data.template.size == 0 {
            return invalid("data search and template sizes must be positive".into());
        }

        if dist.world_size == 0 {
            return invalid("dist.world_size must be positive".into());
        }
        if dist.sync_timeout_secs == 0 {
            return invalid("dist.sync_timeout_secs must be positive".into());
        }

        if test.epoch == 0 {
            return invalid("test.epoch must be positive".into());
        }

        Ok(())
    }

    /// The gradient clipping threshold, if clipping is enabled.
    pub fn grad_clip_norm(&self) -> Option<f32> {
        self.train.grad_clip_norm.filter(|norm| *norm > 0.)
    }
}

fn invalid(msg: String) -> Result<()> {
    Err(TrainErr::InvalidConfig(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RunConfiguration::default().validate().is_ok());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut config = RunConfiguration::default();
        config.train.batch_size = 0;

        assert!(matches!(config.validate(), Err(TrainErr::InvalidConfig(_))));
    }

    #[test]
    fn clipping_is_disabled_by_non_positive_norms() {
        let mut config = RunConfiguration::default();
        assert_eq!(config.grad_clip_norm(), Some(0.1));

        config.train.grad_clip_norm = Some(0.);
        assert_eq!(config.grad_clip_norm(), None);

        config.train.grad_clip_norm = None;
        assert_eq!(config.grad_clip_norm(), None);
    }
}

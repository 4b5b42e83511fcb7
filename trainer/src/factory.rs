use std::{num::NonZeroUsize, sync::Arc};

use log::{debug, info};
use machine_learning::{
    arch::{
        Sequential,
        loss::{GIoU, IoUScore, L1},
    },
    optimization::{
        Adam, ConstantLr, GradientDescent, GradientDescentWithMomentum, LrScheduler, MultiStepLr,
        Optimizer, StepLr, WeightDecay,
    },
    training::{Actor, ActorSettings, Objective},
};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Result, Settings, TrainErr,
    config::{OptimizerKind, RunConfiguration, SchedulerKind},
    data::{DataLoader, DataSource, ShardSpec, SyntheticTracking, TrackingDataset},
    distribution::{self, ModelHandle, ProcessGroup, WorkerIdentity},
    trainer::{Trainer, TrainerComponents},
};

/// The datasets of a run, loaded once and shared by every worker.
#[derive(Debug, Clone)]
pub struct Datasets {
    pub train: Arc<TrackingDataset>,
    pub val: Option<Arc<TrackingDataset>>,
}

/// Materializes the stateful components of a run from its configuration.
#[derive(Debug, Clone)]
pub struct ComponentFactory {
    config: Arc<RunConfiguration>,
}

impl ComponentFactory {
    pub fn new(config: Arc<RunConfiguration>) -> Self {
        Self { config }
    }

    /// Builds the box head and its initial parameters.
    ///
    /// The initialization is seeded with `model.seed`, so every replica starts from the same
    /// parameters.
    pub fn build_model(&self) -> Result<(Sequential, Vec<f32>)> {
        let model_cfg = &self.config.model;

        let model = Sequential::box_head(model_cfg.input_dim, &model_cfg.hidden_dims)?;
        let params = model.init_params(&mut StdRng::seed_from_u64(model_cfg.seed))?;

        Ok((model, params))
    }

    /// Builds the `giou`, `l1` and `iou` loss terms with their configured weights.
    pub fn build_objective(&self) -> Objective {
        let train = &self.config.train;

        Objective::new()
            .with_loss("giou", GIoU)
            .with_weight("giou", train.giou_weight)
            .with_loss("l1", L1)
            .with_weight("l1", train.l1_weight)
            .with_loss("iou", IoUScore)
            .with_weight("iou", train.iou_weight)
    }

    /// Builds the configured optimizer for `len` parameters.
    pub fn build_optimizer(&self, len: usize) -> Box<dyn Optimizer> {
        let train = &self.config.train;
        let [beta1, beta2] = train.betas;

        match train.optimizer {
            OptimizerKind::Adamw => Box::new(Adam::new(
                len,
                train.lr,
                beta1,
                beta2,
                train.eps,
                WeightDecay::Decoupled(train.weight_decay),
            )),
            OptimizerKind::Adam => Box::new(Adam::new(
                len,
                train.lr,
                beta1,
                beta2,
                train.eps,
                WeightDecay::L2(train.weight_decay),
            )),
            OptimizerKind::Sgd => Box::new(GradientDescent::new(train.lr, train.weight_decay)),
            OptimizerKind::Momentum => Box::new(GradientDescentWithMomentum::new(
                len,
                train.lr,
                train.momentum,
                train.weight_decay,
            )),
        }
    }

    /// Builds the learning rate schedule.
    ///
    /// The schedule advances once per optimizer step, so its epoch denominated drop points are
    /// converted to steps with `batches_per_epoch`.
    pub fn build_scheduler(&self, batches_per_epoch: usize) -> Box<dyn LrScheduler> {
        let train = &self.config.train;
        let sched = &train.scheduler;

        match sched.kind {
            SchedulerKind::Step => Box::new(StepLr::new(
                train.lr,
                train.lr_drop_epoch * batches_per_epoch,
                sched.decay_rate,
            )),
            SchedulerKind::Mstep => Box::new(MultiStepLr::new(
                train.lr,
                sched
                    .milestones
                    .iter()
                    .map(|epoch| epoch * batches_per_epoch)
                    .collect(),
                sched.decay_rate,
            )),
            SchedulerKind::Constant => Box::new(ConstantLr::new(train.lr)),
        }
    }

    /// Loads or generates the train and validation datasets.
    ///
    /// Splits with a `path` are read from CSV, the rest are generated from the search and
    /// template geometry. No validation set is built when it has neither a path nor samples.
    pub fn load_datasets(&self) -> Result<Datasets> {
        let data = &self.config.data;
        let input_dim = self.config.model.input_dim;
        let generator = SyntheticTracking::new(data.search.clone(), data.template.clone());

        let train = match &data.train.path {
            Some(path) => TrackingDataset::from_csv(path, input_dim)?,
            None => generator.generate(data.train.samples_per_epoch, input_dim, data.seed)?,
        };

        let val = match (&data.val.path, data.val.samples) {
            (Some(path), _) => Some(TrackingDataset::from_csv(path, input_dim)?),
            (None, 0) => None,
            (None, n) => Some(generator.generate(n, input_dim, data.seed.wrapping_add(1))?),
        };

        info!(
            train = train.len(),
            val = val.as_ref().map(|v| v.len()).unwrap_or(0);
            "loaded datasets"
        );

        Ok(Datasets {
            train: Arc::new(train),
            val: val.map(Arc::new),
        })
    }

    /// Builds the loader of `identity`'s shard of `dataset`.
    pub fn build_loader(
        &self,
        dataset: Arc<TrackingDataset>,
        identity: WorkerIdentity,
    ) -> Result<DataLoader> {
        let shard = match identity.local_rank {
            None => ShardSpec::whole(),
            Some(rank) => NonZeroUsize::new(identity.world_size)
                .and_then(|n| ShardSpec::new(rank, n))
                .ok_or_else(|| {
                    TrainErr::InvalidConfig(format!(
                        "rank {rank} is out of range for a world of {}",
                        identity.world_size
                    ))
                })?,
        };

        DataLoader::new(
            dataset,
            shard,
            self.config.train.batch_size,
            self.config.data.seed,
        )
    }

    /// Builds the actor driving `net`.
    pub fn build_actor(&self, net: ModelHandle) -> Result<Actor<ModelHandle>> {
        let settings = ActorSettings {
            search_size: self.config.data.search.size,
        };

        Ok(Actor::new(net, self.build_objective(), settings)?)
    }

    /// Builds the whole trainer of one worker.
    ///
    /// # Arguments
    /// * `settings` - Where the run lives on disk.
    /// * `identity` - The worker's identity.
    /// * `group` - The run's process group, required when the identity has a rank.
    /// * `datasets` - The datasets shared by every worker.
    pub fn build_trainer(
        &self,
        settings: &Settings,
        identity: WorkerIdentity,
        group: Option<Arc<ProcessGroup>>,
        datasets: &Datasets,
    ) -> Result<Trainer> {
        let (model, params) = self.build_model()?;
        let handle = distribution::wrap(model, params, identity, group)?;
        let actor = self.build_actor(handle)?;

        let train_loader = self.build_loader(datasets.train.clone(), identity)?;
        if train_loader.is_empty() {
            return Err(TrainErr::Data(format!(
                "rank {} has no training samples, the dataset holds {}",
                identity.rank(),
                datasets.train.len()
            )));
        }

        let val_loader = match &datasets.val {
            Some(val) => Some(Box::new(self.build_loader(val.clone(), identity)?) as Box<dyn DataSource>),
            None => None,
        };

        let optimizer = self.build_optimizer(actor.net().params().len());
        let scheduler = self.build_scheduler(train_loader.len());

        debug!(
            rank = identity.rank(),
            batches = train_loader.len(),
            params = actor.net().params().len();
            "built trainer"
        );

        Ok(Trainer::new(
            self.config.clone(),
            settings.clone(),
            identity,
            TrainerComponents {
                actor,
                optimizer,
                scheduler,
                train_loader: Box::new(train_loader),
                val_loader,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::arch::{BOX_HEAD_OUTPUTS, Model};

    use super::*;
    use crate::distribution::{LaunchParams, resolve};

    fn small_config() -> RunConfiguration {
        let mut config = RunConfiguration::default();
        config.model.input_dim = 6;
        config.model.hidden_dims = vec![8];
        config.train.batch_size = 4;
        config.data.train.samples_per_epoch = 40;
        config
    }

    #[test]
    fn models_are_seeded() {
        let factory = ComponentFactory::new(Arc::new(small_config()));
        let (model, a) = factory.build_model().unwrap();
        let (_, b) = factory.build_model().unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), model.size());
        assert_eq!(model.output_dim(), BOX_HEAD_OUTPUTS);
    }

    #[test]
    fn step_schedule_drops_in_steps() {
        let mut config = small_config();
        config.train.lr = 1.0;
        config.train.lr_drop_epoch = 2;
        let factory = ComponentFactory::new(Arc::new(config));

        let mut scheduler = factory.build_scheduler(5);
        for _ in 0..9 {
            scheduler.step();
        }
        assert_eq!(scheduler.lr(), 1.0);

        scheduler.step();
        assert!((scheduler.lr() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn objective_holds_every_term() {
        let factory = ComponentFactory::new(Arc::new(small_config()));
        let objective = factory.build_objective();

        assert!(objective.validate().is_ok());
        assert_eq!(objective.names().collect::<Vec<_>>(), ["giou", "iou", "l1"]);
    }

    #[test]
    fn negative_weights_fail_actor_construction() {
        let mut config = small_config();
        config.train.l1_weight = -1.0;
        let factory = ComponentFactory::new(Arc::new(config));
        let datasets = factory.load_datasets().unwrap();

        let result = factory.build_trainer(
            &Settings::new("s", "c", "/tmp"),
            resolve(&LaunchParams::default()),
            None,
            &datasets,
        );

        assert!(matches!(result, Err(TrainErr::Ml(_))));
    }

    #[test]
    fn ranks_get_equal_shards() {
        let factory = ComponentFactory::new(Arc::new(small_config()));
        let datasets = factory.load_datasets().unwrap();

        let lens: Vec<_> = (0..3)
            .map(|rank| {
                let identity = resolve(&LaunchParams::for_rank(rank, 3));
                factory
                    .build_loader(datasets.train.clone(), identity)
                    .unwrap()
                    .len()
            })
            .collect();

        // 40 samples / 3 ranks => 13 each => 4 batches of at most 4
        assert_eq!(lens, [4, 4, 4]);
    }

    #[test]
    fn no_validation_set_by_default() {
        let factory = ComponentFactory::new(Arc::new(small_config()));
        assert!(factory.load_datasets().unwrap().val.is_none());
    }
}

use std::{collections::BTreeMap, fmt, path::PathBuf, sync::Arc};

use log::{debug, error, info, warn};
use machine_learning::{
    optimization::{LrScheduler, Optimizer, clip_grad_norm},
    training::{Actor, Batch, LossOutput},
};

use crate::{
    Result, Settings, TrainErr,
    checkpoint::{CHECKPOINT_VERSION, Checkpoint, CheckpointStore},
    config::RunConfiguration,
    data::DataSource,
    distribution::{ModelHandle, WorkerIdentity},
    run_log::RunLog,
    state::{StatsMeter, TrainingState},
};

/// Where a `Trainer` is in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainerStatus {
    Idle,
    Running { epoch: usize, step: usize },
    Checkpointing { epoch: usize },
    Evaluating { epoch: usize },
    /// `last_epoch` is `None` if no epoch was ever trained.
    Completed { last_epoch: Option<usize> },
    Failed(String),
}

impl fmt::Display for TrainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainerStatus::Idle => write!(f, "idle"),
            TrainerStatus::Running { epoch, step } => write!(f, "running epoch {epoch} step {step}"),
            TrainerStatus::Checkpointing { epoch } => write!(f, "checkpointing epoch {epoch}"),
            TrainerStatus::Evaluating { epoch } => write!(f, "evaluating epoch {epoch}"),
            TrainerStatus::Completed { last_epoch: None } => write!(f, "completed"),
            TrainerStatus::Completed {
                last_epoch: Some(epoch),
            } => write!(f, "completed after epoch {epoch}"),
            TrainerStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// How a run treats previous checkpoints and failing steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePolicy {
    /// Resume from the latest checkpoint of this (script, config) pair, if any.
    pub load_latest: bool,
    /// Skip failing steps instead of aborting the run.
    pub fail_safe: bool,
}

impl Default for ResumePolicy {
    fn default() -> Self {
        Self {
            load_latest: true,
            fail_safe: true,
        }
    }
}

/// What happened in a trained epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub successful_steps: usize,
    pub skipped_steps: usize,
    /// Averages over the successful steps, validation stats are prefixed with `Val/`.
    pub stats: BTreeMap<String, f32>,
    /// The learning rate at the end of the epoch.
    pub lr: f32,
    /// The checkpoint written after the epoch, always `None` outside the coordinator.
    pub checkpoint: Option<PathBuf>,
}

/// What a finished run reports.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// The first epoch this call trained, after resuming.
    pub start_epoch: usize,
    pub epochs: Vec<EpochReport>,
    pub status: TrainerStatus,
    pub final_params: Vec<f32>,
    /// The amount of gradient synchronizations this worker took part in.
    pub sync_count: usize,
    pub global_step: usize,
}

/// The stateful parts a `Trainer` drives.
pub struct TrainerComponents {
    pub actor: Actor<ModelHandle>,
    pub optimizer: Box<dyn Optimizer>,
    pub scheduler: Box<dyn LrScheduler>,
    pub train_loader: Box<dyn DataSource>,
    pub val_loader: Option<Box<dyn DataSource>>,
}

/// Drives the epochs of one worker: steps, validation, checkpoints and resuming.
pub struct Trainer {
    config: Arc<RunConfiguration>,
    settings: Settings,
    identity: WorkerIdentity,
    actor: Actor<ModelHandle>,
    optimizer: Box<dyn Optimizer>,
    scheduler: Box<dyn LrScheduler>,
    train_loader: Box<dyn DataSource>,
    val_loader: Option<Box<dyn DataSource>>,
    checkpoints: CheckpointStore,
    run_log: Option<RunLog>,
    state: TrainingState,
    status: TrainerStatus,
    global_step: usize,
}

impl Trainer {
    /// Creates a new `Idle` trainer.
    ///
    /// # Arguments
    /// * `config` - The run's configuration.
    /// * `settings` - Where the run lives on disk.
    /// * `identity` - The identity of the worker running this trainer.
    /// * `components` - The model, objective, optimizer, schedule and data of the worker.
    pub fn new(
        config: Arc<RunConfiguration>,
        settings: Settings,
        identity: WorkerIdentity,
        components: TrainerComponents,
    ) -> Self {
        let TrainerComponents {
            actor,
            optimizer,
            scheduler,
            train_loader,
            val_loader,
        } = components;

        let checkpoints = CheckpointStore::new(settings.checkpoint_dir(), settings.net_type());

        Self {
            config,
            settings,
            identity,
            actor,
            optimizer,
            scheduler,
            train_loader,
            val_loader,
            checkpoints,
            run_log: None,
            state: TrainingState::default(),
            status: TrainerStatus::Idle,
            global_step: 0,
        }
    }

    pub fn status(&self) -> &TrainerStatus {
        &self.status
    }

    pub fn identity(&self) -> WorkerIdentity {
        self.identity
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn params(&self) -> &[f32] {
        self.actor.net().params()
    }

    /// Trains up to epoch `total_epochs - 1`.
    ///
    /// Every worker of a run must call this with the same arguments. Any error aborts the whole
    /// run, so the other workers fail at their next collective instead of waiting forever.
    ///
    /// # Arguments
    /// * `total_epochs` - The amount of epochs of the run, resumed epochs included.
    /// * `policy` - Whether to resume and whether failing steps are skipped.
    ///
    /// # Returns
    /// The summary of the epochs trained by this call, or the error that stopped the run.
    pub async fn train(&mut self, total_epochs: usize, policy: ResumePolicy) -> Result<RunSummary> {
        match self.run(total_epochs, policy).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                let reason = e.to_string();

                if e.is_secondary() {
                    warn!(rank = self.identity.rank(); "run stopped by another worker: {reason}");
                } else {
                    error!(rank = self.identity.rank(); "run failed: {reason}");
                }

                self.actor.net().abort(&reason);
                self.status = TrainerStatus::Failed(reason);
                Err(e)
            }
        }
    }

    async fn run(&mut self, total_epochs: usize, policy: ResumePolicy) -> Result<RunSummary> {
        let start_epoch = if policy.load_latest {
            self.resume()?
        } else {
            0
        };

        if self.identity.is_coordinator() {
            self.run_log = match RunLog::create(self.settings.log_file()) {
                Ok(log) => Some(log),
                Err(e) => {
                    warn!("can't create run log {}: {e}", self.settings.log_file().display());
                    None
                }
            };
        }

        self.actor.net().barrier().await?;
        self.actor.net_mut().broadcast_params().await?;

        if start_epoch >= total_epochs {
            info!(
                rank = self.identity.rank(),
                start_epoch = start_epoch,
                total_epochs = total_epochs;
                "every epoch is already trained"
            );
        }

        let mut epochs = Vec::new();
        let mut last_epoch = start_epoch.checked_sub(1);

        for epoch in start_epoch..total_epochs {
            if self.threshold_reached(epoch) {
                info!(
                    rank = self.identity.rank(),
                    epoch = epoch,
                    global_step = self.global_step;
                    "stop threshold already reached"
                );
                break;
            }

            let mut report = self.train_epoch(epoch, policy.fail_safe).await?;

            if self.validation_due(epoch) {
                let val_stats = self.validate(epoch, policy.fail_safe)?;
                report
                    .stats
                    .extend(val_stats.into_iter().map(|(k, v)| (format!("Val/{k}"), v)));
            }

            let stop = self.stop_due(epoch);
            report.checkpoint = self
                .checkpoint(epoch, stop || epoch + 1 == total_epochs, &report.stats)
                .await?;

            self.log_epoch(&report);
            epochs.push(report);
            last_epoch = Some(epoch);

            if stop {
                info!(rank = self.identity.rank(), epoch = epoch; "stopping early");
                break;
            }
        }

        self.status = TrainerStatus::Completed { last_epoch };
        info!(rank = self.identity.rank(); "{}", self.status);

        Ok(RunSummary {
            start_epoch,
            epochs,
            status: self.status.clone(),
            final_params: self.actor.net().params().to_vec(),
            sync_count: self.actor.net().sync_count(),
            global_step: self.global_step,
        })
    }

    /// Restores the latest checkpoint, if any.
    ///
    /// # Returns
    /// The first epoch left to train.
    fn resume(&mut self) -> Result<usize> {
        let Some(epoch) = self.checkpoints.latest()? else {
            info!(rank = self.identity.rank(); "no checkpoint found, training from scratch");
            return Ok(0);
        };

        let checkpoint = self.checkpoints.load(epoch)?;
        let path = self.checkpoints.path_for(epoch);
        let mismatch = |msg: String| TrainErr::CheckpointIo {
            path: path.clone(),
            msg,
        };

        let params = self.actor.net_mut().params_mut();
        if checkpoint.params.len() != params.len() {
            return Err(mismatch(format!(
                "holds {} parameters, the model has {}",
                checkpoint.params.len(),
                params.len()
            )));
        }
        params.copy_from_slice(&checkpoint.params);

        self.optimizer
            .load_state(checkpoint.optimizer)
            .map_err(|e| mismatch(e.to_string()))?;
        self.scheduler
            .load_state(checkpoint.scheduler)
            .map_err(|e| mismatch(e.to_string()))?;
        self.global_step = checkpoint.global_step;

        info!(
            rank = self.identity.rank(),
            epoch = epoch,
            global_step = self.global_step;
            "resumed from {}",
            path.display()
        );

        Ok(epoch + 1)
    }

    async fn train_epoch(&mut self, epoch: usize, fail_safe: bool) -> Result<EpochReport> {
        self.state.reset(epoch);
        self.train_loader.reset(epoch);

        let steps = self.train_loader.len();
        let print_interval = self.config.train.print_interval.max(1);

        while let Some(next) = self.train_loader.next_batch() {
            let step = self.state.step;
            self.status = TrainerStatus::Running { epoch, step };

            let output = match next.and_then(|batch| self.forward_backward(&batch)) {
                Ok(output) => Some(output),
                Err(e) => {
                    let failure = TrainErr::StepFailure {
                        epoch,
                        step,
                        reason: e.to_string(),
                    };

                    if !fail_safe {
                        return Err(failure);
                    }

                    warn!(rank = self.identity.rank(); "skipping step: {failure}");
                    self.state.skipped_steps += 1;
                    None
                }
            };

            // Failed steps still take part in the collective, without contributing.
            if self
                .actor
                .net_mut()
                .synchronize_gradients(output.is_some())
                .await?
            {
                self.apply_update()?;
            }

            if let Some(output) = output {
                self.state.meter.update(&output.stats);
                self.state.successful_steps += 1;
            }

            self.state.step += 1;
            self.global_step += 1;

            if self.state.step % print_interval == 0 || self.state.step == steps {
                self.log_progress(steps);
            }
        }

        Ok(EpochReport {
            epoch,
            successful_steps: self.state.successful_steps,
            skipped_steps: self.state.skipped_steps,
            stats: self.state.meter.averages(),
            lr: self.optimizer.learning_rate(),
            checkpoint: None,
        })
    }

    /// Computes the loss of a batch and its gradient.
    fn forward_backward(&mut self, batch: &Batch) -> Result<LossOutput> {
        self.actor.net_mut().zero_grad();

        let output = self.actor.compute_loss(batch)?;

        let non_finite = output.non_finite_terms();
        if !non_finite.is_empty() {
            return Err(TrainErr::Data(format!("non finite loss terms {non_finite:?}")));
        }

        self.actor.backward(&output)?;
        Ok(output)
    }

    /// Clips the synchronized gradient and takes an optimizer step at the scheduled rate.
    fn apply_update(&mut self) -> Result<()> {
        let net = self.actor.net_mut();

        if let Some(max_norm) = self.config.grad_clip_norm() {
            clip_grad_norm(net.grad_mut(), max_norm);
        }

        self.optimizer.set_learning_rate(self.scheduler.lr());

        let (params, grad) = net.params_and_grad();
        self.optimizer.update_params(grad, params)?;
        self.scheduler.step();

        Ok(())
    }

    fn validation_due(&self, epoch: usize) -> bool {
        let interval = self.config.train.val_epoch_interval;
        self.val_loader.is_some() && interval > 0 && (epoch + 1) % interval == 0
    }

    /// Scores this worker's validation shard without updating anything.
    fn validate(&mut self, epoch: usize, fail_safe: bool) -> Result<BTreeMap<String, f32>> {
        let Some(loader) = self.val_loader.as_mut() else {
            return Ok(BTreeMap::new());
        };

        self.status = TrainerStatus::Evaluating { epoch };
        loader.reset(epoch);

        let mut meter = StatsMeter::new();
        let mut step = 0;

        while let Some(next) = loader.next_batch() {
            match next.and_then(|batch| self.actor.compute_loss(&batch).map_err(TrainErr::from)) {
                Ok(output) => meter.update(&output.stats),
                Err(e) if fail_safe => {
                    warn!(
                        rank = self.identity.rank(),
                        epoch = epoch,
                        step = step;
                        "skipping validation batch: {e}"
                    );
                }
                Err(e) => {
                    return Err(TrainErr::StepFailure {
                        epoch,
                        step,
                        reason: format!("validation: {e}"),
                    });
                }
            }

            step += 1;
        }

        debug!(rank = self.identity.rank(), epoch = epoch; "validated {step} batches");
        Ok(meter.averages())
    }

    /// Whether the run must stop after training `epoch`.
    fn stop_due(&self, epoch: usize) -> bool {
        self.threshold_reached(epoch + 1)
    }

    /// Whether `stop_epoch` or `max_steps` forbid training `next_epoch`.
    fn threshold_reached(&self, next_epoch: usize) -> bool {
        let train = &self.config.train;

        let epoch_reached = train.stop_epoch.is_some_and(|stop| next_epoch >= stop);
        let steps_reached = train.max_steps.is_some_and(|max| self.global_step >= max);

        epoch_reached || steps_reached
    }

    /// Writes the checkpoint of `epoch` when the cadence hits, then waits for every worker.
    ///
    /// Only the coordinator writes, a failed write is logged and the run goes on.
    async fn checkpoint(
        &mut self,
        epoch: usize,
        is_last: bool,
        stats: &BTreeMap<String, f32>,
    ) -> Result<Option<PathBuf>> {
        let interval = self.config.train.checkpoint_interval.max(1);
        if !is_last && (epoch + 1) % interval != 0 {
            return Ok(None);
        }

        self.status = TrainerStatus::Checkpointing { epoch };
        let mut written = None;

        if self.identity.is_coordinator() {
            let checkpoint = Checkpoint {
                version: CHECKPOINT_VERSION,
                net_type: self.settings.net_type(),
                script_name: self.settings.script_name.clone(),
                config_name: self.settings.config_name.clone(),
                epoch,
                params: self.actor.net().params().to_vec(),
                optimizer: self.optimizer.state(),
                scheduler: self.scheduler.state(),
                global_step: self.global_step,
                stats: stats.clone(),
            };

            match self.checkpoints.save(&checkpoint) {
                Ok(path) => written = Some(path),
                Err(e) => warn!(epoch = epoch; "failed to write checkpoint: {e}"),
            }
        }

        self.actor.net().barrier().await?;
        Ok(written)
    }

    fn log_progress(&self, steps: usize) {
        if !self.identity.is_coordinator() {
            return;
        }

        let TrainingState {
            epoch, step, meter, ..
        } = &self.state;

        info!(
            epoch = *epoch,
            step = *step,
            steps = steps,
            loss = meter.average("Loss/total").unwrap_or(f32::NAN),
            iou = meter.average("IoU").unwrap_or(f32::NAN),
            lr = self.optimizer.learning_rate();
            "[train: {epoch}, {step} / {steps}]"
        );
    }

    fn log_epoch(&self, report: &EpochReport) {
        let Some(log) = &self.run_log else {
            return;
        };

        if let Err(e) = log.append_epoch(report.epoch, report.lr, report.skipped_steps, &report.stats)
        {
            warn!("can't append to run log {}: {e}", log.path().display());
        }
    }
}

use std::{sync::Arc, time::Duration};

use log::{error, info};
use tokio::task::JoinSet;

use crate::{
    ComponentFactory, Result, Settings, TrainErr,
    config::RunConfiguration,
    distribution::{LaunchParams, ProcessGroup, WorkerIdentity, resolve},
    trainer::{ResumePolicy, RunSummary},
};

/// The outcome of one worker of a run.
#[derive(Debug, Clone)]
pub struct WorkerSummary {
    pub identity: WorkerIdentity,
    pub summary: RunSummary,
}

/// Runs a whole training run: one worker in single device mode, one task per rank otherwise.
///
/// # Arguments
/// * `config` - The merged configuration of the run.
/// * `settings` - Where the run lives on disk.
/// * `params` - The launch parameters, the world size falls back to `dist.world_size`.
/// * `policy` - Whether to resume and whether failing steps are skipped.
///
/// # Returns
/// The summary of every worker sorted by rank, or the error that stopped the run. When several
/// workers fail, the root cause is preferred over the synchronization failures it caused.
pub async fn launch(
    config: Arc<RunConfiguration>,
    settings: Settings,
    params: LaunchParams,
    policy: ResumePolicy,
) -> Result<Vec<WorkerSummary>> {
    config.validate()?;

    if let Some(rank) = params.local_rank.filter(|rank| *rank != 0) {
        return Err(TrainErr::InvalidConfig(format!(
            "every rank is spawned by the coordinator, got LOCAL_RANK={rank}"
        )));
    }

    let world_size = params.world_size.unwrap_or(config.dist.world_size);
    let total_epochs = config.train.epoch;

    let factory = ComponentFactory::new(config.clone());
    let datasets = factory.load_datasets()?;

    if world_size == 1 && params.local_rank.is_none() {
        let identity = resolve(&params);
        info!(device = identity.device.ordinal; "single device run");

        let mut trainer = factory.build_trainer(&settings, identity, None, &datasets)?;
        let summary = trainer.train(total_epochs, policy).await?;

        return Ok(vec![WorkerSummary { identity, summary }]);
    }

    info!(world_size = world_size; "distributed run");

    let timeout = Duration::from_secs(config.dist.sync_timeout_secs);
    let group = Arc::new(ProcessGroup::new(world_size, timeout));
    let mut workers = JoinSet::new();

    for rank in 0..world_size {
        let identity = resolve(&LaunchParams::for_rank(rank, world_size));
        let factory = factory.clone();
        let settings = settings.clone();
        let datasets = datasets.clone();
        let group = group.clone();

        workers.spawn(async move {
            let built = factory.build_trainer(&settings, identity, Some(group.clone()), &datasets);
            let result = match built {
                Ok(mut trainer) => trainer.train(total_epochs, policy).await,
                Err(e) => Err(e),
            };

            if let Err(e) = &result {
                group.abort(format!("rank {rank}: {e}"));
            }

            (identity, result)
        });
    }

    let mut summaries = Vec::with_capacity(world_size);
    let mut root_cause = None;
    let mut secondary = None;

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((identity, Ok(summary))) => summaries.push(WorkerSummary { identity, summary }),
            Ok((_, Err(e))) if e.is_secondary() => {
                secondary.get_or_insert(e);
            }
            Ok((identity, Err(e))) => {
                error!(rank = identity.rank(); "worker failed: {e}");
                root_cause.get_or_insert(e);
            }
            Err(e) => {
                let reason = format!("worker task failed: {e}");
                group.abort(reason.clone());
                root_cause.get_or_insert(TrainErr::SynchronizationFailure(reason));
            }
        }
    }

    if let Some(e) = root_cause.or(secondary) {
        return Err(e);
    }

    summaries.sort_by_key(|worker| worker.identity.rank());
    Ok(summaries)
}

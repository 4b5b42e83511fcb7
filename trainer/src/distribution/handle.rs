use std::sync::Arc;

use log::debug;
use machine_learning::arch::{Model, Network};
use ndarray::{Array2, ArrayView2};

use super::{Device, ProcessGroup, WorkerIdentity};
use crate::{Result, TrainErr};

/// A model, its parameters and its gradient, living on one device.
pub struct Replica {
    model: Box<dyn Model>,
    params: Vec<f32>,
    grad: Vec<f32>,
    device: Device,
}

/// The trainer's view of the model, written once for single device and replicated runs.
pub enum ModelHandle {
    /// A single device run, nothing to synchronize.
    Local(Replica),
    /// One replica of a distributed run, kept identical to the others through `group`.
    Replicated {
        replica: Replica,
        identity: WorkerIdentity,
        group: Arc<ProcessGroup>,
        syncs: usize,
    },
}

/// Binds a model and its parameters to the worker's device.
///
/// # Arguments
/// * `model` - The model.
/// * `params` - The model's initial parameters.
/// * `identity` - The worker's identity.
/// * `group` - The run's process group, required when the identity has a rank.
///
/// # Returns
/// A `Replicated` handle when the identity has a rank and a `Local` one otherwise, or
/// `DeviceConflict` if another worker already owns the device.
pub fn wrap<M>(
    model: M,
    params: Vec<f32>,
    identity: WorkerIdentity,
    group: Option<Arc<ProcessGroup>>,
) -> Result<ModelHandle>
where
    M: Model + 'static,
{
    if params.len() != model.size() {
        return Err(TrainErr::Ml(machine_learning::MlErr::SizeMismatch {
            what: "initial parameters",
            got: params.len(),
            expected: model.size(),
        }));
    }

    let replica = Replica {
        grad: vec![0.; params.len()],
        model: Box::new(model),
        params,
        device: identity.device,
    };

    match (identity.local_rank, group) {
        (None, _) => Ok(ModelHandle::Local(replica)),
        (Some(_), Some(group)) => {
            if !group.bind_device(identity.device) {
                return Err(TrainErr::DeviceConflict {
                    ordinal: identity.device.ordinal,
                });
            }

            debug!(rank = identity.rank(), device = identity.device.ordinal; "bound replica");

            Ok(ModelHandle::Replicated {
                replica,
                identity,
                group,
                syncs: 0,
            })
        }
        (Some(rank), None) => Err(TrainErr::InvalidConfig(format!(
            "rank {rank} needs a process group to replicate its model"
        ))),
    }
}

impl ModelHandle {
    fn replica(&self) -> &Replica {
        match self {
            ModelHandle::Local(replica) | ModelHandle::Replicated { replica, .. } => replica,
        }
    }

    fn replica_mut(&mut self) -> &mut Replica {
        match self {
            ModelHandle::Local(replica) | ModelHandle::Replicated { replica, .. } => replica,
        }
    }

    pub fn params(&self) -> &[f32] {
        &self.replica().params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.replica_mut().params
    }

    pub fn grad(&self) -> &[f32] {
        &self.replica().grad
    }

    pub fn grad_mut(&mut self) -> &mut [f32] {
        &mut self.replica_mut().grad
    }

    /// Borrows the parameters mutably and the gradient immutably, for an optimizer step.
    pub fn params_and_grad(&mut self) -> (&mut [f32], &[f32]) {
        let replica = self.replica_mut();
        (replica.params.as_mut_slice(), replica.grad.as_slice())
    }

    pub fn zero_grad(&mut self) {
        self.replica_mut().grad.fill(0.);
    }

    pub fn device(&self) -> Device {
        self.replica().device
    }

    pub fn is_replicated(&self) -> bool {
        matches!(self, ModelHandle::Replicated { .. })
    }

    /// The amount of gradient synchronizations this handle took part in.
    pub fn sync_count(&self) -> usize {
        match self {
            ModelHandle::Local(_) => 0,
            ModelHandle::Replicated { syncs, .. } => *syncs,
        }
    }

    /// Averages the gradient across every replica that contributed to this step.
    ///
    /// Replicated handles must call this exactly once per step, even when the step failed
    /// locally, so the other replicas aren't left waiting.
    ///
    /// # Arguments
    /// * `contributed` - Whether this replica computed a gradient for this step.
    ///
    /// # Returns
    /// Whether an optimizer update must be applied, `false` when no replica contributed.
    pub async fn synchronize_gradients(&mut self, contributed: bool) -> Result<bool> {
        match self {
            ModelHandle::Local(_) => Ok(contributed),
            ModelHandle::Replicated {
                replica,
                group,
                syncs,
                ..
            } => {
                let contributors = group.all_reduce_mean(&mut replica.grad, contributed).await?;
                *syncs += 1;
                Ok(contributors > 0)
            }
        }
    }

    /// Overwrites every replica's parameters with rank `0`'s.
    pub async fn broadcast_params(&mut self) -> Result<()> {
        match self {
            ModelHandle::Local(_) => Ok(()),
            ModelHandle::Replicated {
                replica,
                identity,
                group,
                ..
            } => Ok(group.broadcast(identity.rank(), &mut replica.params).await?),
        }
    }

    /// Waits for every replica to reach this point.
    pub async fn barrier(&self) -> Result<()> {
        match self {
            ModelHandle::Local(_) => Ok(()),
            ModelHandle::Replicated { group, .. } => Ok(group.barrier().await?),
        }
    }

    /// Makes every pending and future collective of the run fail.
    pub fn abort(&self, reason: &str) {
        if let ModelHandle::Replicated { group, .. } = self {
            group.abort(reason);
        }
    }
}

impl Network for ModelHandle {
    fn forward(&mut self, x: ArrayView2<f32>) -> machine_learning::Result<Array2<f32>> {
        let Replica { model, params, .. } = self.replica_mut();
        model.forward(params, x)
    }

    fn backward(&mut self, d: Array2<f32>) -> machine_learning::Result<()> {
        let Replica {
            model,
            params,
            grad,
            ..
        } = self.replica_mut();
        model.backward(params, grad, d)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use machine_learning::arch::Sequential;
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::distribution::{LaunchParams, resolve};

    fn model() -> (Sequential, Vec<f32>) {
        let model = Sequential::box_head(4, &[3]).unwrap();
        let params = model.init_params(&mut StdRng::seed_from_u64(0)).unwrap();
        (model, params)
    }

    #[tokio::test]
    async fn single_device_handle_is_local() {
        let (model, params) = model();
        let identity = resolve(&LaunchParams::default());
        let mut handle = wrap(model, params, identity, None).unwrap();

        assert!(!handle.is_replicated());
        assert!(handle.synchronize_gradients(true).await.unwrap());
        assert!(!handle.synchronize_gradients(false).await.unwrap());
        assert_eq!(handle.sync_count(), 0);
    }

    #[tokio::test]
    async fn forward_and_backward_use_the_bundled_parameters() {
        let (mut model, params) = model();
        let x = array![[0.1_f32, 0.2, 0.3, 0.4]];
        let expected = model.forward(&params, x.view()).unwrap();

        let identity = resolve(&LaunchParams::default());
        let mut handle = wrap(model, params, identity, None).unwrap();

        let y = handle.forward(x.view()).unwrap();
        assert_eq!(y, expected);

        handle.backward(Array2::ones(y.dim())).unwrap();
        assert!(handle.grad().iter().any(|g| *g != 0.));

        handle.zero_grad();
        assert!(handle.grad().iter().all(|g| *g == 0.));
    }

    #[test]
    fn two_replicas_cannot_share_a_device() {
        let group = Arc::new(ProcessGroup::new(2, Duration::from_secs(1)));
        let identity = resolve(&LaunchParams::for_rank(0, 2));

        let (model_a, params_a) = model();
        let (model_b, params_b) = model();

        assert!(wrap(model_a, params_a, identity, Some(Arc::clone(&group))).is_ok());
        assert!(matches!(
            wrap(model_b, params_b, identity, Some(group)),
            Err(TrainErr::DeviceConflict { ordinal: 0 })
        ));
    }

    #[test]
    fn wrong_parameter_count_is_rejected() {
        let (model, mut params) = model();
        params.pop();

        let identity = resolve(&LaunchParams::default());
        assert!(wrap(model, params, identity, None).is_err());
    }
}

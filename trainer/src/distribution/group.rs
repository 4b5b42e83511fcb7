use std::{
    collections::HashSet,
    error::Error,
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use log::{debug, error};
use parking_lot::Mutex;
use tokio::sync::{Barrier, Notify};

use super::Device;

/// A failed collective operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncErr {
    /// Some worker aborted the group.
    Aborted(String),
    /// Some worker didn't reach the collective in time.
    Timeout(Duration),
    /// A worker contributed a buffer of a different size.
    SizeMismatch { got: usize, expected: usize },
}

impl fmt::Display for SyncErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncErr::Aborted(reason) => write!(f, "process group aborted: {reason}"),
            SyncErr::Timeout(timeout) => {
                write!(f, "timed out after {timeout:?} waiting for the other workers")
            }
            SyncErr::SizeMismatch { got, expected } => {
                write!(f, "buffer size mismatch, got {got} and expected {expected}")
            }
        }
    }
}

impl Error for SyncErr {}

type Result<T> = std::result::Result<T, SyncErr>;

/// The running sum of the current mean all reduce and the outcome of the previous one.
#[derive(Debug, Default)]
struct Reduction {
    sum: Vec<f32>,
    contributors: usize,
    outcome: (usize, Option<Vec<f32>>),
}

/// The collective state shared by every worker of a distributed run.
///
/// Every collective is a rendezvous on a barrier of `world_size` parties. A worker that never
/// shows up turns into a timeout, which aborts the group so every other worker fails fast.
pub struct ProcessGroup {
    world_size: usize,
    timeout: Duration,
    barrier: Barrier,
    reduction: Mutex<Reduction>,
    broadcast: Mutex<Option<Vec<f32>>>,
    devices: Mutex<HashSet<Device>>,
    aborted: AtomicBool,
    abort_reason: Mutex<Option<String>>,
    abort_notify: Notify,
}

impl ProcessGroup {
    /// Creates a new `ProcessGroup`.
    ///
    /// # Arguments
    /// * `world_size` - The amount of workers taking part in every collective.
    /// * `timeout` - How long a worker waits for the others at a collective.
    pub fn new(world_size: usize, timeout: Duration) -> Self {
        Self {
            world_size,
            timeout,
            barrier: Barrier::new(world_size),
            reduction: Mutex::default(),
            broadcast: Mutex::default(),
            devices: Mutex::default(),
            aborted: AtomicBool::new(false),
            abort_reason: Mutex::default(),
            abort_notify: Notify::new(),
        }
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Claims `device` for the calling worker.
    ///
    /// # Returns
    /// `false` if another worker already owns it.
    pub fn bind_device(&self, device: Device) -> bool {
        self.devices.lock().insert(device)
    }

    /// Aborts the group, every pending and future collective fails with the given reason.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();

        {
            let mut slot = self.abort_reason.lock();
            if slot.is_some() {
                return;
            }

            error!("aborting process group: {reason}");
            *slot = Some(reason);
        }

        self.aborted.store(true, Ordering::SeqCst);
        self.abort_notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Waits until every worker reaches this point.
    pub async fn barrier(&self) -> Result<()> {
        self.rendezvous().await.map(|_| ())
    }

    /// Replaces `grad` by the mean of the gradients of the workers that contributed.
    ///
    /// Every worker must call this once per step, contributing or not, otherwise the others
    /// would wait forever. When nobody contributes `grad` is left as is.
    ///
    /// # Arguments
    /// * `grad` - This worker's gradient, overwritten with the mean.
    /// * `contributed` - Whether this worker's gradient takes part in the mean.
    ///
    /// # Returns
    /// The amount of workers that contributed.
    pub async fn all_reduce_mean(&self, grad: &mut [f32], contributed: bool) -> Result<usize> {
        if contributed {
            let mut reduction = self.reduction.lock();

            if reduction.sum.is_empty() {
                reduction.sum = vec![0.; grad.len()];
            }

            if reduction.sum.len() != grad.len() {
                let err = SyncErr::SizeMismatch {
                    got: grad.len(),
                    expected: reduction.sum.len(),
                };
                drop(reduction);
                self.abort(err.to_string());
                return Err(err);
            }

            reduction.sum.iter_mut().zip(grad.iter()).for_each(|(s, g)| *s += g);
            reduction.contributors += 1;
        }

        if self.rendezvous().await? {
            let mut reduction = self.reduction.lock();
            let n = std::mem::take(&mut reduction.contributors);
            let mut sum = std::mem::take(&mut reduction.sum);

            sum.iter_mut().for_each(|s| *s /= n as f32);
            reduction.outcome = (n, (n > 0).then_some(sum));
            debug!(contributors = n; "reduced gradients");
        }

        // The outcome stays put until every worker reaches the next reduction.
        self.rendezvous().await?;

        let reduction = self.reduction.lock();
        let (contributors, mean) = &reduction.outcome;

        if let Some(mean) = mean {
            if mean.len() != grad.len() {
                return Err(SyncErr::SizeMismatch {
                    got: grad.len(),
                    expected: mean.len(),
                });
            }

            grad.copy_from_slice(mean);
        }

        Ok(*contributors)
    }

    /// Copies the root's `params` into every other worker's `params`.
    ///
    /// # Arguments
    /// * `rank` - The caller's rank, rank `0` is the root.
    /// * `params` - The root's source or the destination of every other worker.
    pub async fn broadcast(&self, rank: usize, params: &mut [f32]) -> Result<()> {
        if rank == 0 {
            *self.broadcast.lock() = Some(params.to_vec());
        }

        self.rendezvous().await?;

        if rank != 0 {
            let guard = self.broadcast.lock();

            if let Some(source) = guard.as_ref() {
                if source.len() != params.len() {
                    let err = SyncErr::SizeMismatch {
                        got: params.len(),
                        expected: source.len(),
                    };
                    drop(guard);
                    self.abort(err.to_string());
                    return Err(err);
                }

                params.copy_from_slice(source);
            }
        }

        self.rendezvous().await?;

        if rank == 0 {
            *self.broadcast.lock() = None;
        }

        Ok(())
    }

    /// Waits for every worker on the barrier unless the group is aborted or the wait times out.
    ///
    /// # Returns
    /// Whether the caller is the barrier's leader for this round.
    async fn rendezvous(&self) -> Result<bool> {
        let aborted = self.abort_notify.notified();
        tokio::pin!(aborted);
        aborted.as_mut().enable();

        if self.is_aborted() {
            return Err(self.abort_err());
        }

        tokio::select! {
            res = self.barrier.wait() => {
                if self.is_aborted() {
                    return Err(self.abort_err());
                }

                Ok(res.is_leader())
            }
            _ = &mut aborted => Err(self.abort_err()),
            _ = tokio::time::sleep(self.timeout) => {
                let err = SyncErr::Timeout(self.timeout);
                self.abort(err.to_string());
                Err(err)
            }
        }
    }

    fn abort_err(&self) -> SyncErr {
        let reason = self.abort_reason.lock().clone().unwrap_or_default();
        SyncErr::Aborted(reason)
    }
}

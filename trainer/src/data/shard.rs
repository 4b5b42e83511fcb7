use std::num::NonZeroUsize;
use std::ops::Range;

/// Splits `total` samples among `num_workers` and returns the shard for `worker_id`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and of equal size.
/// - The `total % num_workers` tail samples belong to no shard, so every worker runs the same
///   amount of steps.
pub fn shard_range(total: usize, worker_id: usize, num_workers: usize) -> Range<usize> {
    let size = total / num_workers.max(1);
    let start = worker_id * size;

    start..start + size
}

/// Shard specification for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub worker_id: usize,
    pub num_workers: NonZeroUsize,
}

impl ShardSpec {
    /// Creates a new `ShardSpec`, `None` if `worker_id` is out of range.
    pub fn new(worker_id: usize, num_workers: NonZeroUsize) -> Option<Self> {
        (worker_id < num_workers.get()).then_some(Self {
            worker_id,
            num_workers,
        })
    }

    /// The shard of a single worker run, holding every sample.
    pub fn whole() -> Self {
        Self {
            worker_id: 0,
            num_workers: NonZeroUsize::MIN,
        }
    }

    #[inline]
    pub fn range(self, total: usize) -> Range<usize> {
        shard_range(total, self.worker_id, self.num_workers.get())
    }
}

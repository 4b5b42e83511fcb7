pub mod dataloader;
pub mod dataset;
pub mod shard;
pub mod synthetic;

pub use dataloader::DataLoader;
pub use dataset::TrackingDataset;
pub use shard::{ShardSpec, shard_range};
pub use synthetic::SyntheticTracking;

use machine_learning::training::Batch;

use crate::Result;

/// A lazy, restartable and finite per epoch sequence of batches.
pub trait DataSource: Send + Sync {
    /// The amount of batches yielded per epoch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewinds the source to the start of `epoch`.
    fn reset(&mut self, epoch: usize);

    /// Yields the next batch of the epoch, `None` once it's exhausted.
    fn next_batch(&mut self) -> Option<Result<Batch>>;
}

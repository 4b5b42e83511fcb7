use std::{ops::Range, sync::Arc};

use machine_learning::training::Batch;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::{DataSource, TrackingDataset, shard::ShardSpec};
use crate::{Result, TrainErr};

/// Shard aware loader that reshuffles the whole dataset every epoch.
///
/// Every rank shuffles with the same seed before taking its shard, so the shards of one epoch are
/// disjoint and all ranks yield the same amount of batches.
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: Arc<TrackingDataset>,
    shard: ShardSpec,
    batch_size: usize,
    seed: u64,
    order: Vec<usize>,
    cursor: usize,
}

impl DataLoader {
    /// Creates a new `DataLoader` positioned at the start of epoch 0.
    ///
    /// # Arguments
    /// * `dataset` - The dataset shared by every rank of the run.
    /// * `shard` - This rank's shard.
    /// * `batch_size` - The maximum amount of samples per batch.
    /// * `seed` - The shuffling seed, must be equal on every rank.
    pub fn new(
        dataset: Arc<TrackingDataset>,
        shard: ShardSpec,
        batch_size: usize,
        seed: u64,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(TrainErr::InvalidConfig("batch_size must be > 0".into()));
        }

        let mut loader = Self {
            dataset,
            shard,
            batch_size,
            seed,
            order: Vec::new(),
            cursor: 0,
        };

        loader.reset(0);
        Ok(loader)
    }

    #[inline]
    pub fn shard(&self) -> ShardSpec {
        self.shard
    }

    #[inline]
    pub fn shard_range(&self) -> Range<usize> {
        self.shard.range(self.dataset.len())
    }
}

impl DataSource for DataLoader {
    fn len(&self) -> usize {
        self.shard_range().len().div_ceil(self.batch_size)
    }

    fn reset(&mut self, epoch: usize) {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
        let mut order: Vec<_> = (0..self.dataset.len()).collect();
        order.shuffle(&mut rng);

        let range = self.shard_range();
        order.truncate(range.end);
        order.drain(..range.start);

        self.order = order;
        self.cursor = 0;
    }

    fn next_batch(&mut self) -> Option<Result<Batch>> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.dataset.batch(&self.order[self.cursor..end]);

        self.cursor = end;
        Some(Ok(batch))
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, num::NonZeroUsize};

    use ndarray::Array2;

    use super::*;

    fn dataset(n: usize) -> Arc<TrackingDataset> {
        let inputs = Array2::from_shape_fn((n, 1), |(i, _)| i as f32);
        let targets = Array2::from_elem((n, 4), 0.5);
        Arc::new(TrackingDataset::new(inputs, targets).unwrap())
    }

    fn drain(loader: &mut DataLoader) -> Vec<usize> {
        let mut seen = Vec::new();
        while let Some(batch) = loader.next_batch() {
            seen.extend(batch.unwrap().inputs.iter().map(|v| *v as usize));
        }
        seen
    }

    #[test]
    fn batches_respect_shard_and_batch_size() {
        let shard = ShardSpec::new(1, NonZeroUsize::new(3).unwrap()).unwrap();
        let mut loader = DataLoader::new(dataset(10), shard, 2, 0).unwrap();

        // 3 samples per shard => batches of 2 and 1
        assert_eq!(loader.len(), 2);
        assert_eq!(loader.next_batch().unwrap().unwrap().len(), 2);
        assert_eq!(loader.next_batch().unwrap().unwrap().len(), 1);
        assert!(loader.next_batch().is_none());
    }

    #[test]
    fn shards_of_one_epoch_are_disjoint() {
        let ds = dataset(12);
        let workers = NonZeroUsize::new(3).unwrap();
        let mut all = HashSet::new();

        for id in 0..3 {
            let shard = ShardSpec::new(id, workers).unwrap();
            let mut loader = DataLoader::new(ds.clone(), shard, 4, 5).unwrap();
            loader.reset(2);

            for i in drain(&mut loader) {
                assert!(all.insert(i), "sample {i} visited twice");
            }
        }

        assert_eq!(all.len(), 12);
    }

    #[test]
    fn reset_reshuffles_per_epoch_and_repeats_per_seed() {
        let mut loader = DataLoader::new(dataset(64), ShardSpec::whole(), 8, 1).unwrap();

        let first = drain(&mut loader);
        loader.reset(0);
        assert_eq!(drain(&mut loader), first);

        loader.reset(1);
        let second = drain(&mut loader);
        assert_ne!(second, first);

        let mut sorted = second.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(DataLoader::new(dataset(4), ShardSpec::whole(), 0, 0).is_err());
    }
}

use std::collections::BTreeMap;

/// Running averages of named values.
#[derive(Debug, Clone, Default)]
pub struct StatsMeter {
    sums: BTreeMap<String, (f64, usize)>,
}

impl StatsMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one observation of every value in `stats`, non finite values are ignored.
    pub fn update(&mut self, stats: &BTreeMap<String, f32>) {
        for (name, value) in stats {
            if !value.is_finite() {
                continue;
            }

            let (sum, count) = self.sums.entry(name.clone()).or_default();
            *sum += *value as f64;
            *count += 1;
        }
    }

    /// The average of a single value, `None` if it was never observed.
    pub fn average(&self, name: &str) -> Option<f32> {
        self.sums
            .get(name)
            .map(|(sum, count)| (*sum / *count as f64) as f32)
    }

    pub fn averages(&self) -> BTreeMap<String, f32> {
        self.sums
            .iter()
            .map(|(name, (sum, count))| (name.clone(), (*sum / *count as f64) as f32))
            .collect()
    }

    pub fn reset(&mut self) {
        self.sums.clear();
    }
}

/// The position and running stats of the epoch being trained.
#[derive(Debug, Clone, Default)]
pub struct TrainingState {
    pub epoch: usize,
    /// The amount of steps run in the epoch, skipped ones included.
    pub step: usize,
    pub successful_steps: usize,
    pub skipped_steps: usize,
    pub meter: StatsMeter,
}

impl TrainingState {
    /// Starts `epoch` from scratch.
    pub fn reset(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.step = 0;
        self.successful_steps = 0;
        self.skipped_steps = 0;
        self.meter.reset();
    }
}

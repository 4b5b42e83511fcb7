use std::path::PathBuf;

use serde::Serialize;

use crate::{RunConfiguration, Settings, checkpoint::CheckpointStore};

/// What the tracker needs at inference time, resolved from the run's configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerParams {
    pub search_factor: f32,
    pub search_size: usize,
    /// The checkpoint written after `test.epoch` trained epochs.
    pub checkpoint: PathBuf,
    pub save_all_boxes: bool,
}

impl TrackerParams {
    pub fn resolve(config: &RunConfiguration, settings: &Settings) -> Self {
        let test = &config.test;
        let store = CheckpointStore::new(settings.checkpoint_dir(), settings.net_type());

        Self {
            search_factor: test.search_factor,
            search_size: test.search_size,
            checkpoint: store.path_for(test.epoch.saturating_sub(1)),
            save_all_boxes: test.save_all_boxes,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn checkpoint_follows_the_tested_epoch() {
        let mut config = RunConfiguration::default();
        config.test.epoch = 300;
        config.test.search_size = 384;

        let params = TrackerParams::resolve(&config, &Settings::new("aiatrack", "baseline", "/runs"));

        assert_eq!(params.search_size, 384);
        assert_eq!(
            params.checkpoint,
            Path::new("/runs/checkpoints/train/aiatrack/baseline/AIATRACK_ep0299.ckpt")
        );
    }
}

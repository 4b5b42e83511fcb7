#![allow(dead_code)]

use std::{fs, path::Path, sync::Arc};

use trainer::{ConfigStore, RunConfiguration};

/// A configuration small enough to train in a few milliseconds.
pub const SMALL_RUN: &str = "
MODEL:
  INPUT_DIM: 4
  HIDDEN_DIMS: [8]
TRAIN:
  EPOCH: 2
  BATCH_SIZE: 4
  PRINT_INTERVAL: 2
  LR: 0.01
DATA:
  TRAIN:
    SAMPLES_PER_EPOCH: 16
DIST:
  SYNC_TIMEOUT_SECS: 30
";

/// Writes `yaml` to `<dir>/<name>.yaml` and merges it onto the defaults.
pub fn config(dir: &Path, name: &str, yaml: &str) -> Arc<RunConfiguration> {
    let path = dir.join(format!("{name}.yaml"));
    fs::write(&path, yaml).unwrap();

    Arc::new(ConfigStore::apply_overrides(&ConfigStore::defaults(), &path).unwrap())
}

/// Writes a CSV dataset of `n` samples with 4 features, the target of `nan_row` is `NaN`.
pub fn csv_dataset(path: &Path, n: usize, nan_row: Option<usize>) {
    let mut content = String::from("# f0, f1, f2, f3, cx, cy, w, h\n");

    for i in 0..n {
        let v = i as f32 / n as f32;
        let cx = if Some(i) == nan_row {
            "NaN".to_string()
        } else {
            format!("{}", 0.3 + 0.4 * v)
        };

        content.push_str(&format!("{v}, {}, 0.2, 0.3, {cx}, 0.5, 0.2, 0.3\n", 1. - v));
    }

    fs::write(path, content).unwrap();
}

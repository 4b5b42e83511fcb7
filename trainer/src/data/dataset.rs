use std::{fs, path::Path};

use machine_learning::training::Batch;
use ndarray::{Array2, Axis};

use crate::{Result, TrainErr};

/// An in memory tracking dataset: one feature vector and one `(cx, cy, w, h)` box per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingDataset {
    inputs: Array2<f32>,
    targets: Array2<f32>,
}

impl TrackingDataset {
    /// Creates a new dataset from owned buffers.
    ///
    /// # Returns
    /// A `Data` error if the row counts differ or the targets aren't boxes.
    pub fn new(inputs: Array2<f32>, targets: Array2<f32>) -> Result<Self> {
        if inputs.nrows() != targets.nrows() || targets.ncols() != 4 {
            return Err(TrainErr::Data(format!(
                "inputs {:?} and targets {:?} don't describe the same samples",
                inputs.dim(),
                targets.dim()
            )));
        }

        Ok(Self { inputs, targets })
    }

    /// Loads a dataset from a CSV file of `input_dim + 4` values per line.
    ///
    /// Blank lines and lines starting with `#` are skipped.
    ///
    /// # Arguments
    /// * `path` - The CSV file.
    /// * `input_dim` - The size of each feature vector, the last 4 values are the target box.
    pub fn from_csv(path: &Path, input_dim: usize) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| TrainErr::Data(format!("can't read {}: {e}", path.display())))?;

        let width = input_dim + 4;
        let mut values = Vec::new();

        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let row = line
                .split(',')
                .map(|v| v.trim().parse::<f32>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| TrainErr::Data(format!("{}:{}: {e}", path.display(), i + 1)))?;

            if row.len() != width {
                return Err(TrainErr::Data(format!(
                    "{}:{}: expected {width} values, got {}",
                    path.display(),
                    i + 1,
                    row.len()
                )));
            }

            values.extend(row);
        }

        let rows = values.len() / width;
        let all = Array2::from_shape_vec((rows, width), values)
            .map_err(|e| TrainErr::Data(e.to_string()))?;

        let (inputs, targets) = all.view().split_at(Axis(1), input_dim);
        Self::new(inputs.to_owned(), targets.to_owned())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn input_dim(&self) -> usize {
        self.inputs.ncols()
    }

    /// Gathers the samples at `indices` into a batch.
    pub fn batch(&self, indices: &[usize]) -> Batch {
        Batch::new(
            self.inputs.select(Axis(0), indices),
            self.targets.select(Axis(0), indices),
        )
    }
}

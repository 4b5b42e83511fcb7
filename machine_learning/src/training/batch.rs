use ndarray::Array2;

/// A mini batch of samples: one feature vector and one `(cx, cy, w, h)` target box per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Array2<f32>,
    pub targets: Array2<f32>,
}

impl Batch {
    /// Creates a new `Batch`.
    pub fn new(inputs: Array2<f32>, targets: Array2<f32>) -> Self {
        Self { inputs, targets }
    }

    /// The amount of samples in the batch.
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

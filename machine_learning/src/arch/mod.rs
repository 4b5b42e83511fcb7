pub mod activations;
pub mod boxes;
pub mod layers;
pub mod loss;
mod model;
mod sequential;

pub use model::{Model, Network};
pub use sequential::{BOX_HEAD_OUTPUTS, Sequential};

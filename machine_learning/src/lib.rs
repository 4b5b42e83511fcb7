pub mod arch;
pub mod error;
pub mod initialization;
pub mod optimization;
pub mod training;

pub use error::{MlErr, Result};

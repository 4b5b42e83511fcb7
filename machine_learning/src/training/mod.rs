mod actor;
mod batch;
mod objective;

pub use actor::{Actor, ActorSettings, LossOutput};
pub use batch::Batch;
pub use objective::Objective;

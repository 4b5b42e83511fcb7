mod group;
mod handle;
mod identity;

pub use group::{ProcessGroup, SyncErr};
pub use handle::{ModelHandle, Replica, wrap};
pub use identity::{Device, LaunchParams, WorkerIdentity, resolve};

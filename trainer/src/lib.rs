pub mod checkpoint;
pub mod config;
pub mod data;
pub mod distribution;
pub mod error;
pub mod factory;
pub mod inference;
pub mod launch;
pub mod run_log;
pub mod settings;
pub mod state;
pub mod trainer;

pub use config::{ConfigStore, RunConfiguration};
pub use error::{Result, TrainErr};
pub use factory::{ComponentFactory, Datasets};
pub use inference::TrackerParams;
pub use launch::{WorkerSummary, launch};
pub use settings::Settings;
pub use trainer::{EpochReport, ResumePolicy, RunSummary, Trainer, TrainerStatus};

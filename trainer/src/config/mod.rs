mod run_config;
mod store;

pub use run_config::{
    DataConfig, DistConfig, GeometryConfig, ModelConfig, OptimizerKind, RunConfiguration,
    SchedulerConfig, SchedulerKind, SearchConfig, SplitConfig, TestConfig, TrainConfig,
    ValSplitConfig,
};
pub use store::ConfigStore;

use std::{error::Error, fmt, io, path::PathBuf};

use machine_learning::MlErr;

use crate::distribution::SyncErr;

/// The trainer module's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Everything that can go wrong while configuring or driving a training run.
#[derive(Debug)]
pub enum TrainErr {
    /// The configuration override file doesn't exist, the run must not start.
    ConfigNotFound(PathBuf),
    /// The override file isn't valid YAML or a recognized key holds a value of the wrong type.
    ConfigParse { path: PathBuf, msg: String },
    /// The merged configuration holds an impossible value.
    InvalidConfig(String),
    /// A model, objective or optimizer failure.
    Ml(MlErr),
    /// The data source failed to load or yield a batch.
    Data(String),
    /// A single training step failed, recoverable when running fail safe.
    StepFailure {
        epoch: usize,
        step: usize,
        reason: String,
    },
    /// A worker failed to reach a collective boundary, always fatal for the whole run.
    SynchronizationFailure(String),
    /// Two workers of the same run tried to bind one device.
    DeviceConflict { ordinal: usize },
    /// A checkpoint couldn't be read or written.
    CheckpointIo { path: PathBuf, msg: String },
    /// The run was interrupted before every epoch was trained.
    Interrupted,
    Io(io::Error),
}

impl TrainErr {
    /// Whether this error is the echo of a failure in another worker rather than a root cause.
    pub fn is_secondary(&self) -> bool {
        matches!(self, TrainErr::SynchronizationFailure(_))
    }

    /// The process exit status this error ends the run with, `130` for an interrupted run.
    pub fn exit_code(&self) -> u8 {
        match self {
            TrainErr::Interrupted => 130,
            _ => 1,
        }
    }
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::ConfigNotFound(path) => {
                write!(f, "configuration file {} not found", path.display())
            }
            TrainErr::ConfigParse { path, msg } => {
                write!(f, "can't parse configuration file {}: {msg}", path.display())
            }
            TrainErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            TrainErr::Ml(e) => write!(f, "{e}"),
            TrainErr::Data(msg) => write!(f, "data error: {msg}"),
            TrainErr::StepFailure {
                epoch,
                step,
                reason,
            } => write!(f, "step {step} of epoch {epoch} failed: {reason}"),
            TrainErr::SynchronizationFailure(msg) => {
                write!(f, "gradient synchronization failed: {msg}")
            }
            TrainErr::DeviceConflict { ordinal } => {
                write!(f, "device cpu:{ordinal} is already bound to another worker")
            }
            TrainErr::CheckpointIo { path, msg } => {
                write!(f, "checkpoint {}: {msg}", path.display())
            }
            TrainErr::Interrupted => {
                write!(f, "interrupted, resume from the latest checkpoint")
            }
            TrainErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Ml(e) => Some(e),
            TrainErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MlErr> for TrainErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<SyncErr> for TrainErr {
    fn from(value: SyncErr) -> Self {
        Self::SynchronizationFailure(value.to_string())
    }
}

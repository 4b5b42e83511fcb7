use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};
use machine_learning::optimization::{OptimizerState, SchedulerState};
use serde::{Deserialize, Serialize};

use crate::{Result, TrainErr};

/// The checkpoint format version written by this crate.
pub const CHECKPOINT_VERSION: u32 = 1;

const EXTENSION: &str = "ckpt";

/// Everything needed to resume a run after `epoch` finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub net_type: String,
    pub script_name: String,
    pub config_name: String,
    /// The last finished epoch, zero based.
    pub epoch: usize,
    pub params: Vec<f32>,
    pub optimizer: OptimizerState,
    pub scheduler: SchedulerState,
    pub global_step: usize,
    /// The averaged stats of `epoch`.
    pub stats: BTreeMap<String, f32>,
}

/// The checkpoints of one (script, config) pair, one file per epoch.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    net_type: String,
}

impl CheckpointStore {
    /// Creates a new `CheckpointStore`, the directory is created on the first save.
    ///
    /// # Arguments
    /// * `dir` - The directory holding the checkpoints.
    /// * `net_type` - The tag checkpoint files are prefixed with.
    pub fn new(dir: impl Into<PathBuf>, net_type: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            net_type: net_type.into(),
        }
    }

    /// `<dir>/<NET>_ep<epoch:04>.ckpt`
    pub fn path_for(&self, epoch: usize) -> PathBuf {
        self.dir
            .join(format!("{}_ep{epoch:04}.{EXTENSION}", self.net_type))
    }

    /// Finds the highest checkpointed epoch.
    ///
    /// # Returns
    /// `None` if the directory doesn't exist or holds no checkpoint of this network type.
    pub fn latest(&self) -> Result<Option<usize>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(&self.dir, e)),
        };

        let mut latest = None;

        for entry in entries {
            let entry = entry.map_err(|e| self.io_err(&self.dir, e))?;
            let name = entry.file_name();

            if let Some(epoch) = name.to_str().and_then(|name| self.parse_epoch(name)) {
                latest = latest.max(Some(epoch));
            }
        }

        Ok(latest)
    }

    /// Reads the checkpoint of `epoch`.
    ///
    /// # Returns
    /// A `CheckpointIo` error if the file can't be read, is corrupt or belongs to another
    /// network type, version or epoch.
    pub fn load(&self, epoch: usize) -> Result<Checkpoint> {
        let path = self.path_for(epoch);
        let content = fs::read_to_string(&path).map_err(|e| self.io_err(&path, e))?;

        let checkpoint: Checkpoint =
            serde_json::from_str(&content).map_err(|e| self.io_err(&path, e))?;

        let mismatch = if checkpoint.version != CHECKPOINT_VERSION {
            Some(format!(
                "version {} isn't supported, expected {CHECKPOINT_VERSION}",
                checkpoint.version
            ))
        } else if checkpoint.net_type != self.net_type {
            Some(format!(
                "written by a {} network, expected {}",
                checkpoint.net_type, self.net_type
            ))
        } else if checkpoint.epoch != epoch {
            Some(format!("holds epoch {}, expected {epoch}", checkpoint.epoch))
        } else {
            None
        };

        if let Some(msg) = mismatch {
            return Err(TrainErr::CheckpointIo { path, msg });
        }

        debug!(epoch = epoch; "loaded checkpoint {}", path.display());
        Ok(checkpoint)
    }

    /// Writes a checkpoint: first to a temporary file, then renamed into place.
    ///
    /// # Returns
    /// The path of the written checkpoint.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        let path = self.path_for(checkpoint.epoch);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));

        fs::create_dir_all(&self.dir).map_err(|e| self.io_err(&self.dir, e))?;

        let json = serde_json::to_vec(checkpoint).map_err(|e| self.io_err(&path, e))?;
        fs::write(&tmp, json).map_err(|e| self.io_err(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| self.io_err(&path, e))?;

        info!(epoch = checkpoint.epoch; "saved checkpoint {}", path.display());
        Ok(path)
    }

    fn parse_epoch(&self, file_name: &str) -> Option<usize> {
        file_name
            .strip_prefix(self.net_type.as_str())?
            .strip_prefix("_ep")?
            .strip_suffix(&format!(".{EXTENSION}"))?
            .parse()
            .ok()
    }

    fn io_err(&self, path: &Path, e: impl std::fmt::Display) -> TrainErr {
        TrainErr::CheckpointIo {
            path: path.to_path_buf(),
            msg: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn checkpoint(epoch: usize) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            net_type: "AIATRACK".into(),
            script_name: "aiatrack".into(),
            config_name: "baseline".into(),
            epoch,
            params: vec![0.5, -1.25, 3.0],
            optimizer: OptimizerState::GradientDescent {
                learning_rate: 0.1,
            },
            scheduler: SchedulerState::Constant { step: 12 },
            global_step: 12,
            stats: BTreeMap::from([("Loss/total".to_string(), 0.75)]),
        }
    }

    #[test]
    fn file_names_are_zero_padded() {
        let store = CheckpointStore::new("/runs/ckpt", "AIATRACK");
        assert_eq!(
            store.path_for(7),
            Path::new("/runs/ckpt/AIATRACK_ep0007.ckpt")
        );
    }

    #[test]
    fn latest_picks_the_highest_epoch_of_this_network() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "AIATRACK");
        assert_eq!(store.latest().unwrap(), None);

        store.save(&checkpoint(2)).unwrap();
        store.save(&checkpoint(10)).unwrap();
        fs::write(dir.path().join("OTHER_ep0099.ckpt"), "{}").unwrap();
        fs::write(dir.path().join("AIATRACK_ep0050.ckpt.tmp"), "{}").unwrap();

        assert_eq!(store.latest().unwrap(), Some(10));
    }

    #[test]
    fn missing_directory_has_no_latest() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nope"), "AIATRACK");
        assert_eq!(store.latest().unwrap(), None);
    }

    #[test]
    fn saved_checkpoints_load_back() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested"), "AIATRACK");

        let path = store.save(&checkpoint(3)).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("ckpt.tmp").exists());
        assert_eq!(store.load(3).unwrap(), checkpoint(3));
    }

    #[test]
    fn corrupt_or_foreign_checkpoints_fail_to_load() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "AIATRACK");

        fs::write(store.path_for(0), "not json").unwrap();
        assert!(matches!(store.load(0), Err(TrainErr::CheckpointIo { .. })));

        let other = CheckpointStore::new(dir.path(), "OTHER");
        let mut foreign = checkpoint(1);
        foreign.net_type = "OTHER".into();
        other.save(&foreign).unwrap();
        fs::rename(other.path_for(1), store.path_for(1)).unwrap();
        assert!(matches!(store.load(1), Err(TrainErr::CheckpointIo { .. })));

        assert!(matches!(store.load(5), Err(TrainErr::CheckpointIo { .. })));
    }
}

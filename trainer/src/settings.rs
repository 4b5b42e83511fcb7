use std::path::PathBuf;

/// Where a run lives on disk and how it's named, injected by the entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub script_name: String,
    pub config_name: String,
    pub save_dir: PathBuf,
}

impl Settings {
    /// Creates a new `Settings`.
    ///
    /// # Arguments
    /// * `script_name` - The training script, e.g. `aiatrack`.
    /// * `config_name` - The experiment configuration, e.g. `baseline`.
    /// * `save_dir` - The root directory for checkpoints and logs.
    pub fn new(
        script_name: impl Into<String>,
        config_name: impl Into<String>,
        save_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            script_name: script_name.into(),
            config_name: config_name.into(),
            save_dir: save_dir.into(),
        }
    }

    /// `<save_dir>/checkpoints/train/<script>/<config>`
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.save_dir
            .join("checkpoints")
            .join("train")
            .join(&self.script_name)
            .join(&self.config_name)
    }

    /// `<save_dir>/logs/<script>-<config>.log`
    pub fn log_file(&self) -> PathBuf {
        self.save_dir
            .join("logs")
            .join(format!("{}-{}.log", self.script_name, self.config_name))
    }

    /// The network type tag checkpoints are named after.
    pub fn net_type(&self) -> String {
        self.script_name.to_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn derived_paths() {
        let settings = Settings::new("aiatrack", "baseline", "/runs");

        assert_eq!(
            settings.checkpoint_dir(),
            Path::new("/runs/checkpoints/train/aiatrack/baseline")
        );
        assert_eq!(settings.log_file(), Path::new("/runs/logs/aiatrack-baseline.log"));
        assert_eq!(settings.net_type(), "AIATRACK");
    }
}

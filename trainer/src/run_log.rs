use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::Result;

/// An append only text log of a run, one line per finished epoch.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    /// Creates the log file and its parent directories, keeping any previous content.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a line, a trailing newline is added.
    pub fn append(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Appends the summary line of an epoch.
    ///
    /// `[train: <epoch>] lr: <lr>, skipped: <n>, <stat>: <value>, ...`
    pub fn append_epoch(
        &self,
        epoch: usize,
        lr: f32,
        skipped: usize,
        stats: &BTreeMap<String, f32>,
    ) -> Result<()> {
        let mut line = format!("[train: {epoch}] lr: {lr:.3e}, skipped: {skipped}");

        for (name, value) in stats {
            line.push_str(&format!(", {name}: {value:.5}"));
        }

        self.append(&line)
    }
}

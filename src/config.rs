//! Pipeline configuration
//!
//! A single serializable struct holding every externally supplied parameter of
//! a run: the task, the window length, and the input/work/output locations.
//! Configurations can be saved to and loaded from JSON for reproducible runs.
//!
//! # Example
//!
//! ```ignore
//! let config = PipelineConfig::load_json("configs/ihm.json")?;
//! clinical_seqpack::run_pipeline(&config)?;
//! ```

use crate::error::{PrepError, Result};
use crate::packer::DEFAULT_MAX_LEN;
use crate::targets::Task;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Full configuration of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Task used for target extraction
    pub task: Task,

    /// Window length of every packed sequence
    #[serde(default = "default_max_len")]
    pub max_len: usize,

    /// Raw task root holding one directory per split
    pub task_root: PathBuf,

    /// Root for intermediate stage outputs
    pub work_root: PathBuf,

    /// Final archive path
    pub archive_path: PathBuf,

    /// Splits to process; discovered under `task_root` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub splits: Option<Vec<String>>,
}

fn default_max_len() -> usize {
    DEFAULT_MAX_LEN
}

impl PipelineConfig {
    pub fn new(
        task: Task,
        task_root: impl Into<PathBuf>,
        work_root: impl Into<PathBuf>,
        archive_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            task,
            max_len: DEFAULT_MAX_LEN,
            task_root: task_root.into(),
            work_root: work_root.into(),
            archive_path: archive_path.into(),
            splits: None,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn with_splits(mut self, splits: Vec<String>) -> Self {
        self.splits = Some(splits);
        self
    }

    /// Check parameters that would otherwise fail midway through a run
    pub fn validate(&self) -> Result<()> {
        if self.max_len == 0 {
            return Err(PrepError::Config("max_len must be positive".to_string()));
        }
        if let Some(splits) = &self.splits {
            check_split_names(splits)?;
        }
        if self.archive_path.file_name().is_none() {
            return Err(PrepError::Config(format!(
                "archive path {} has no file name",
                self.archive_path.display()
            )));
        }
        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load and validate configuration from a JSON file
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }
}

/// An explicit split list must be non-empty, free of path separators and
/// name each split once
pub fn check_split_names(splits: &[String]) -> Result<()> {
    if splits.is_empty() {
        return Err(PrepError::Config("splits must not be empty".to_string()));
    }
    let mut seen = HashSet::new();
    for split in splits {
        if split.is_empty() || split.contains(['/', '\\']) {
            return Err(PrepError::Config(format!("invalid split name '{split}'")));
        }
        if !seen.insert(split.as_str()) {
            return Err(PrepError::Config(format!("split '{split}' listed twice")));
        }
    }
    Ok(())
}

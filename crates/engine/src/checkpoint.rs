//! Checkpoint persistence for resumable runs.
//!
//! A checkpoint captures the parameter index (how many passes completed and which bundles are
//! still queued) together with a deep copy of the run state, keyed by pass number. Resuming
//! a run means loading the latest checkpoint, handing its queue to
//! [`ChunkPlanner::resume`](crate::planner::ChunkPlanner::resume) and its run state to the
//! executor.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use chunkflow_types::CoordinateQueue;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::run_state::RunState;

/// Prefix of every checkpoint file name.
pub const CHECKPOINT_FILE_PREFIX: &str = "pass-";

/// Errors surfaced by checkpoint store operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// I/O failure while reading or writing a checkpoint file.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failure.
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Progress marker for a run: completed passes and the bundles still queued.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParameterIndex {
    pub completed_passes: u64,
    pub pending: CoordinateQueue,
}

/// Snapshot written after a successful pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Number of the pass that produced this snapshot, starting at 1.
    pub pass: u64,
    pub saved_at: DateTime<Utc>,
    pub parameter_index: ParameterIndex,
    pub run_state: RunState,
}

impl Checkpoint {
    /// Captures deep copies of `parameter_index` and `run_state`.
    pub fn capture(parameter_index: &ParameterIndex, run_state: &RunState) -> Self {
        Self {
            pass: parameter_index.completed_passes,
            saved_at: Utc::now(),
            parameter_index: parameter_index.clone(),
            run_state: run_state.clone(),
        }
    }

    /// Passes left to run when resuming from this checkpoint.
    pub fn remaining_passes(&self) -> usize {
        self.parameter_index.pending.len()
    }
}

/// Shared trait implemented by checkpoint persistence backends.
pub trait CheckpointStore {
    /// Stores `checkpoint` under its pass number, replacing any earlier copy.
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Loads the checkpoint for `pass`, if one exists.
    fn load(&self, pass: u64) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Pass numbers with a stored checkpoint, in ascending order.
    fn passes(&self) -> Result<Vec<u64>, CheckpointError>;

    /// Loads the checkpoint with the highest pass number.
    fn latest(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        match self.passes()?.last() {
            Some(pass) => self.load(*pass),
            None => Ok(None),
        }
    }
}

/// In-memory checkpoint store primarily used for unit testing.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: BTreeMap<u64, Checkpoint>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.checkpoints.insert(checkpoint.pass, checkpoint.clone());
        Ok(())
    }

    fn load(&self, pass: u64) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.checkpoints.get(&pass).cloned())
    }

    fn passes(&self) -> Result<Vec<u64>, CheckpointError> {
        Ok(self.checkpoints.keys().copied().collect())
    }
}

/// JSON-backed checkpoint store writing one `pass-NNNNNN.json` file per pass.
#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    directory: PathBuf,
}

impl JsonCheckpointStore {
    /// Creates a store rooted at `directory`; the directory is created on first save.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file holding the checkpoint for `pass`.
    pub fn path_for(&self, pass: u64) -> PathBuf {
        self.directory.join(format!("{CHECKPOINT_FILE_PREFIX}{pass:06}.json"))
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.directory)?;
        let path = self.path_for(checkpoint.pass);
        let content = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&path, content)?;
        debug!(pass = checkpoint.pass, path = %path.display(), "checkpoint written");
        Ok(())
    }

    fn load(&self, pass: u64) -> Result<Option<Checkpoint>, CheckpointError> {
        match fs::read_to_string(self.path_for(pass)) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(CheckpointError::Io(error)),
        }
    }

    fn passes(&self) -> Result<Vec<u64>, CheckpointError> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(CheckpointError::Io(error)),
        };

        let mut passes = Vec::new();
        for entry in entries {
            let path = entry?.path();
            match parse_pass_number(&path) {
                Some(pass) => passes.push(pass),
                None => warn!(path = %path.display(), "ignoring unrecognised file in checkpoint directory"),
            }
        }
        passes.sort_unstable();
        Ok(passes)
    }
}

fn parse_pass_number(path: &Path) -> Option<u64> {
    if path.extension()? != "json" {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(CHECKPOINT_FILE_PREFIX)?
        .parse()
        .ok()
}

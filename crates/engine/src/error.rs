//! Error taxonomy for planning and executing a pipeline.
//!
//! Configuration problems are detected while the chunk planner is constructed and stop a run
//! before its first pass. Parameter and step failures happen during a pass and are subject to
//! the failing step's error policy. A [`RunError`] is what a raising failure turns into once
//! the pass executor halts.

use chunkflow_types::WriteMode;
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::executor::ExecutorStatus;

/// Invalid pipeline shape detected before any pass runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("step identifier must not be empty")]
    EmptyIdentifier,
    #[error("duplicate step identifier detected: '{step_id}'")]
    DuplicateStep { step_id: String },
    #[error("source '{step_id}' has no resolvable row count: {reason}")]
    UnresolvedRowCount { step_id: String, reason: String },
    #[error("source '{step_id}' declares a chunk size of zero")]
    ZeroChunkSize { step_id: String },
    #[error("sink '{step_id}' uses write mode '{mode}' but chunked execution requires 'append'")]
    SinkNotAppend { step_id: String, mode: WriteMode },
    #[error("step '{step_id}' sets a value for undeclared parameter '{parameter}'")]
    UnknownParameter { step_id: String, parameter: String },
    #[error("step '{step_id}' renames undeclared output '{output}'")]
    UnknownOutput { step_id: String, output: String },
    #[error("step '{step_id}' has invalid outputs: {reason}")]
    InvalidOutputs { step_id: String, reason: String },
    #[error("balanced schedule for {step_count} chunked sources overflows the pass counter")]
    PassCountOverflow { step_count: usize },
    #[error("coordinate bundle covers steps [{found}] but the pipeline chunks [{expected}]")]
    BundleMismatch { expected: String, found: String },
    #[error("coordinate ({start}, {count}) for '{step_id}' runs past its {total_rows} rows")]
    CoordinateOutOfRange {
        step_id: String,
        start: u64,
        count: u64,
        total_rows: u64,
    },
}

/// A declared parameter could not be bound at invocation time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("step '{step_id}' parameter '{parameter}' is not set explicitly, has no default, and is absent from run state")]
    Unresolved { step_id: String, parameter: String },
}

/// Failure raised while invoking a single step.
#[derive(Debug, Error)]
pub enum StepExecutionError {
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error("step '{step_id}' failed: {error:#}")]
    Failed {
        step_id: String,
        #[source]
        error: anyhow::Error,
    },
    #[error("step '{step_id}' returned {actual} values but declares {expected} outputs")]
    OutputArity { step_id: String, expected: usize, actual: usize },
}

impl StepExecutionError {
    pub(crate) fn failed(step_id: &str, error: anyhow::Error) -> Self {
        StepExecutionError::Failed {
            step_id: step_id.to_string(),
            error,
        }
    }
}

/// Fatal outcome of a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("pass {pass} aborted at step '{step_id}'")]
    StepFailed {
        step_id: String,
        pass: u64,
        #[source]
        error: StepExecutionError,
    },
    #[error("checkpoint for pass {pass} could not be persisted")]
    Checkpoint {
        pass: u64,
        #[source]
        error: CheckpointError,
    },
    #[error("pass {pass} has no coordinate for chunked step '{step_id}'")]
    MissingCoordinate { step_id: String, pass: u64 },
    #[error("executor is {status:?}; only an idle executor can start a run")]
    NotIdle { status: ExecutorStatus },
}

impl RunError {
    /// Identifier of the step that aborted the run, if a step did.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            RunError::StepFailed { step_id, .. } | RunError::MissingCoordinate { step_id, .. } => Some(step_id),
            RunError::Checkpoint { .. } | RunError::NotIdle { .. } => None,
        }
    }

    /// Pass during which the run aborted, if it got that far.
    pub fn pass(&self) -> Option<u64> {
        match self {
            RunError::StepFailed { pass, .. } | RunError::Checkpoint { pass, .. } | RunError::MissingCoordinate { pass, .. } => {
                Some(*pass)
            }
            RunError::NotIdle { .. } => None,
        }
    }
}

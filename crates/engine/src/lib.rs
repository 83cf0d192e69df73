//! # Chunkflow Engine
//!
//! The Chunkflow Engine runs an ordered list of data-processing steps over tabular datasets that
//! may be larger than memory. Sources that declare a chunk size are read in bounded row ranges
//! spread across several passes; every other step runs once per pass against the shared run
//! state. Progress can be checkpointed after each pass so a failed run resumes where it stopped.
//!
//! ## Key Features
//!
//! - **Explicit steps**: Parameters, defaults, and outputs are declared through a builder
//! - **Chunk planning**: Round-robin and balanced strategies compute the full schedule up front
//! - **Pass execution**: Per-step error policies decide whether a failure halts the run
//! - **Checkpoints**: In-memory and JSON-file stores keyed by pass number
//!
//! ## Usage
//!
//! ```rust
//! use chunkflow_engine::{ChunkPlanner, PassExecutor, RunState, Step};
//! use chunkflow_engine::memory::{MemorySink, SyntheticSource};
//! use chunkflow_types::ChunkStrategyKind;
//!
//! let sink = MemorySink::new();
//! let written = sink.destination();
//! let mut steps = vec![
//!     Step::source("orders", SyntheticSource::new("orders", 10).with_chunk_size(Some(4))).build()?,
//!     Step::sink("archive", "orders", sink).build()?,
//! ];
//!
//! let mut planner = ChunkPlanner::new(&steps, ChunkStrategyKind::RoundRobin)?;
//! let report = PassExecutor::new().run(&mut steps, &mut planner, &mut RunState::new())?;
//!
//! assert_eq!(report.pass_count(), 3);
//! assert_eq!(written.lock().map(|table| table.row_count()).unwrap_or_default(), 10);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`step`**: Step declaration, parameter binding, and the source/sink traits
//! - **`run_state`**: Named datasets and variables shared by every step
//! - **`planner`**: Chunk states, strategies, and the coordinate schedule
//! - **`executor`**: The pass loop and its run report
//! - **`checkpoint`**: Checkpoint records and stores
//! - **`config`**: Engine configuration file loading
//! - **`memory`** / **`simulation`**: In-memory adapters and pipeline documents made runnable

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chunkflow_types::{PipelineDefinition, validate_pipeline};

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod executor;
pub mod memory;
pub mod planner;
pub mod run_state;
pub mod simulation;
pub mod step;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore, JsonCheckpointStore, MemoryCheckpointStore, ParameterIndex};
pub use config::{EngineConfig, load_config, load_config_from_path};
pub use error::{ConfigurationError, ParameterError, RunError, StepExecutionError};
pub use executor::{ExecutorStatus, PassExecutor, PassReport, RunReport, StepOutcome, StepStatus};
pub use planner::{ChunkPlanner, ChunkState, ChunkStrategy};
pub use run_state::RunState;
pub use step::{Sink, Source, Step, StepBuilder, StepCall};

/// Loads and validates a pipeline document. YAML and JSON are both accepted.
///
/// # Errors
///
/// Fails when the file cannot be read, does not parse as a pipeline document, or violates a
/// document rule such as a sink reading an undeclared source.
///
/// # Examples
///
/// ```rust
/// use chunkflow_engine::parse_pipeline_file;
///
/// let temp_dir = tempfile::tempdir()?;
/// let path = temp_dir.path().join("orders.yaml");
/// std::fs::write(&path, r#"
/// pipeline: nightly-orders
/// sources:
///   orders:
///     rows: 1000
///     chunk_size: 250
/// sinks:
///   archive:
///     input: orders
/// "#)?;
///
/// let definition = parse_pipeline_file(&path)?;
/// assert_eq!(definition.sources["orders"].chunk_size, Some(250));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn parse_pipeline_file(file_path: impl AsRef<Path>) -> Result<PipelineDefinition> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("Failed to read pipeline file: {}", file_path.display()))?;

    let definition: PipelineDefinition =
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse pipeline file: {}", file_path.display()))?;
    validate_pipeline(&definition).with_context(|| format!("Invalid pipeline file: {}", file_path.display()))?;
    Ok(definition)
}

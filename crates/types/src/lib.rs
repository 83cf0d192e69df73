//! Shared data model for chunked pipeline execution.
//!
//! - [`table`]: tabular datasets and the values stored in run state
//! - [`coordinate`]: row ranges, per-pass coordinate bundles, and the coordinate queue
//! - [`pipeline`]: declarative pipeline documents and their validation

pub mod coordinate;
pub mod pipeline;
pub mod table;

pub use coordinate::{Coordinate, CoordinateBundle, CoordinateQueue, RowRange};
pub use pipeline::validation::{PipelineValidationError, is_valid_identifier, validate_pipeline};
pub use pipeline::{ChunkStrategyKind, ErrorPolicy, PipelineDefinition, SinkDefinition, SourceDefinition, WriteMode};
pub use table::{Datum, Table, TableError};

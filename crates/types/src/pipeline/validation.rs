//! Structural checks applied to pipeline documents before any step is built.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::PipelineDefinition;

static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").expect("identifier pattern is a valid regex"));

/// Reasons a pipeline document is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineValidationError {
    #[error("pipeline document is missing the required 'pipeline' identifier")]
    MissingIdentifier,
    #[error("invalid step identifier '{identifier}': must contain only lowercase letters, numbers, dots, underscores, and hyphens")]
    InvalidIdentifier { identifier: String },
    #[error("pipeline '{pipeline}' must declare at least one source")]
    NoSources { pipeline: String },
    #[error("source '{source_id}' declares a chunk size of zero")]
    ZeroChunkSize { source_id: String },
    #[error("sink '{sink_id}' reads unknown dataset '{input}'")]
    UnknownInput { sink_id: String, input: String },
    #[error("identifier '{identifier}' is declared as both a source and a sink")]
    DuplicateIdentifier { identifier: String },
}

/// Returns `true` when `identifier` is a valid step identifier.
pub fn is_valid_identifier(identifier: &str) -> bool {
    IDENTIFIER_PATTERN.is_match(identifier)
}

/// Validates a parsed pipeline definition.
pub fn validate_pipeline(definition: &PipelineDefinition) -> Result<(), PipelineValidationError> {
    if definition.pipeline.trim().is_empty() {
        return Err(PipelineValidationError::MissingIdentifier);
    }
    if definition.sources.is_empty() {
        return Err(PipelineValidationError::NoSources {
            pipeline: definition.pipeline.clone(),
        });
    }

    for (source_id, source) in &definition.sources {
        if !is_valid_identifier(source_id) {
            return Err(PipelineValidationError::InvalidIdentifier {
                identifier: source_id.clone(),
            });
        }
        if source.chunk_size == Some(0) {
            return Err(PipelineValidationError::ZeroChunkSize {
                source_id: source_id.clone(),
            });
        }
    }

    for (sink_id, sink) in &definition.sinks {
        if !is_valid_identifier(sink_id) {
            return Err(PipelineValidationError::InvalidIdentifier { identifier: sink_id.clone() });
        }
        if definition.sources.contains_key(sink_id) {
            return Err(PipelineValidationError::DuplicateIdentifier { identifier: sink_id.clone() });
        }
        if !definition.sources.contains_key(&sink.input) {
            return Err(PipelineValidationError::UnknownInput {
                sink_id: sink_id.clone(),
                input: sink.input.clone(),
            });
        }
    }

    Ok(())
}

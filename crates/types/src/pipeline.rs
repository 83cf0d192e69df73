//! Declarative pipeline schema shared by the engine and the CLI.
//!
//! A pipeline document names its sources (with row counts and optional chunk sizes) and the
//! sinks that consume them. Authoring order is preserved through `IndexMap` so the declared
//! step order is the execution order.

pub mod validation;

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// What happens when a step fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Halt the run and surface the failure.
    #[default]
    Raise,
    /// Record the failure and continue with the next step.
    Ignore,
}

/// How a sink treats existing content at its destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Add each written slice after the previous ones.
    #[default]
    Append,
    /// Replace the destination on every write.
    Overwrite,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Append => formatter.write_str("append"),
            WriteMode::Overwrite => formatter.write_str("overwrite"),
        }
    }
}

/// Scheduling strategy used to split chunk-enabled sources into passes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategyKind {
    /// Every source advances one chunk per pass; finished sources sit idle.
    #[default]
    RoundRobin,
    /// Every pass carries a proportional share of every source.
    Balanced,
}

impl fmt::Display for ChunkStrategyKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkStrategyKind::RoundRobin => formatter.write_str("round_robin"),
            ChunkStrategyKind::Balanced => formatter.write_str("balanced"),
        }
    }
}

impl FromStr for ChunkStrategyKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" | "direct" => Ok(ChunkStrategyKind::RoundRobin),
            "balanced" | "distributed" => Ok(ChunkStrategyKind::Balanced),
            other => Err(format!("unknown chunk strategy '{other}' (expected round_robin or balanced)")),
        }
    }
}

/// A complete pipeline document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PipelineDefinition {
    /// Canonical pipeline identifier.
    #[serde(default)]
    pub pipeline: String,
    /// Optional descriptive copy.
    #[serde(default)]
    pub description: Option<String>,
    /// Strategy override; falls back to the engine configuration when absent.
    #[serde(default)]
    pub strategy: Option<ChunkStrategyKind>,
    /// Sources keyed by step identifier, in declared order.
    #[serde(default)]
    pub sources: IndexMap<String, SourceDefinition>,
    /// Sinks keyed by step identifier, executed after every source.
    #[serde(default)]
    pub sinks: IndexMap<String, SinkDefinition>,
}

/// Declares a row source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SourceDefinition {
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Total number of rows the source exposes.
    pub rows: u64,
    /// Rows per chunk; the source is read whole when absent.
    #[serde(default)]
    pub chunk_size: Option<u64>,
    #[serde(default)]
    pub on_error: ErrorPolicy,
}

/// Declares a sink that writes one dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SinkDefinition {
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Dataset written by the sink.
    pub input: String,
    #[serde(default)]
    pub mode: WriteMode,
    #[serde(default)]
    pub on_error: ErrorPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pipeline_document_preserving_order() {
        let document = r#"
pipeline: nightly
strategy: balanced
sources:
  orders: { rows: 100, chunk_size: 50 }
  customers: { rows: 60, chunk_size: 20 }
  regions: { rows: 4 }
sinks:
  archive: { input: orders }
"#;
        let definition: PipelineDefinition = serde_yaml::from_str(document).expect("parse");
        assert_eq!(definition.pipeline, "nightly");
        assert_eq!(definition.strategy, Some(ChunkStrategyKind::Balanced));
        let source_ids: Vec<&str> = definition.sources.keys().map(String::as_str).collect();
        assert_eq!(source_ids, vec!["orders", "customers", "regions"]);
        assert_eq!(definition.sources["regions"].chunk_size, None);
        assert_eq!(definition.sinks["archive"].mode, WriteMode::Append);
        assert_eq!(definition.sinks["archive"].on_error, ErrorPolicy::Raise);
    }

    #[test]
    fn strategy_parses_aliases() {
        assert_eq!("round-robin".parse::<ChunkStrategyKind>(), Ok(ChunkStrategyKind::RoundRobin));
        assert_eq!("Distributed".parse::<ChunkStrategyKind>(), Ok(ChunkStrategyKind::Balanced));
        assert!("zigzag".parse::<ChunkStrategyKind>().is_err());
    }
}

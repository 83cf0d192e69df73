//! Pipeline steps and the builder that declares them.
//!
//! A [`Step`] wraps one of three kinds of work:
//!
//! - a **function** step: a closure receiving its bound arguments through a [`StepCall`]
//! - a **source** step: a [`Source`] that reads a row range (or everything) into a [`Table`]
//! - a **sink** step: a [`Sink`] that writes one dataset taken from run state
//!
//! Every step declares its parameters, optional defaults, explicit values, and output names up
//! front through [`StepBuilder`]. Nothing is inferred from the closure signature.
//!
//! ```rust
//! use chunkflow_engine::step::Step;
//! use chunkflow_types::Datum;
//! use serde_json::json;
//!
//! let step = Step::builder("scale", |call| {
//!     let factor = call.scalar("factor")?.as_i64().unwrap_or(1);
//!     Ok(vec![Datum::Scalar(json!(factor * 2))])
//! })
//! .parameter("factor")
//! .value("factor", json!(21))
//! .output("scaled")
//! .build()
//! .expect("valid step");
//!
//! assert_eq!(step.id(), "scale");
//! assert_eq!(step.outputs(), ["scaled".to_string()]);
//! ```

mod binding;
mod call;

use std::fmt;

use anyhow::Result;
use chunkflow_types::{Datum, ErrorPolicy, RowRange, Table, WriteMode};
use indexmap::IndexMap;

pub use call::StepCall;

use crate::error::ConfigurationError;

/// Parameter name that receives the live run state instead of a bound value.
pub const RUN_STATE_PARAMETER: &str = "run_state";

/// A row-producing collaborator, typically a file or table reader.
pub trait Source {
    /// Rows per chunk, or `None` when the source is read whole every pass.
    fn chunk_size(&self) -> Option<u64>;

    /// Total number of rows available.
    fn max_row_count(&self) -> Result<u64>;

    /// Reads `range`, or every row when `range` is `None`.
    fn read(&mut self, range: Option<RowRange>) -> Result<Table>;
}

/// A dataset-consuming collaborator, typically a file or table writer.
pub trait Sink {
    fn write_mode(&self) -> WriteMode;

    /// Writes one slice to the destination.
    fn write(&mut self, table: &Table) -> Result<()>;
}

/// Closure signature for function steps.
pub type StepFunction = Box<dyn FnMut(&mut StepCall<'_>) -> Result<Vec<Datum>>>;

pub(crate) enum StepKind {
    Function(StepFunction),
    Source(Box<dyn Source>),
    Sink(Box<dyn Sink>),
}

/// A declared parameter with an optional default.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub default: Option<Datum>,
}

/// One unit of work in a pipeline.
pub struct Step {
    id: String,
    name: Option<String>,
    parameters: Vec<Parameter>,
    explicit_values: IndexMap<String, Datum>,
    outputs: Vec<String>,
    output_overrides: IndexMap<String, String>,
    error_policy: ErrorPolicy,
    needs_run_state: bool,
    kind: StepKind,
}

impl Step {
    /// Starts declaring a function step.
    pub fn builder<F>(id: impl Into<String>, function: F) -> StepBuilder
    where
        F: FnMut(&mut StepCall<'_>) -> Result<Vec<Datum>> + 'static,
    {
        StepBuilder::new(id.into(), StepKind::Function(Box::new(function)))
    }

    /// Starts declaring a source step. Its single output defaults to the step identifier.
    pub fn source(id: impl Into<String>, source: impl Source + 'static) -> StepBuilder {
        StepBuilder::new(id.into(), StepKind::Source(Box::new(source)))
    }

    /// Starts declaring a sink step that writes the dataset named `input`.
    pub fn sink(id: impl Into<String>, input: impl Into<String>, sink: impl Sink + 'static) -> StepBuilder {
        StepBuilder::new(id.into(), StepKind::Sink(Box::new(sink))).parameter(input)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name, falling back to the identifier.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|name| !name.trim().is_empty()).unwrap_or(&self.id)
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Declared output names before overrides.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Name under which a declared output is written to run state.
    pub fn output_name<'a>(&'a self, declared: &'a str) -> &'a str {
        self.output_overrides.get(declared).map(String::as_str).unwrap_or(declared)
    }

    /// Names this step writes to run state, with overrides applied.
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|declared| self.output_name(declared))
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.error_policy
    }

    pub fn needs_run_state(&self) -> bool {
        self.needs_run_state
    }

    pub fn is_source(&self) -> bool {
        matches!(self.kind, StepKind::Source(_))
    }

    pub fn is_sink(&self) -> bool {
        matches!(self.kind, StepKind::Sink(_))
    }

    /// Chunk size reported by a source step; `None` for every other kind.
    pub fn chunk_size(&self) -> Option<u64> {
        match &self.kind {
            StepKind::Source(source) => source.chunk_size(),
            StepKind::Function(_) | StepKind::Sink(_) => None,
        }
    }

    /// Row count reported by a source step; `None` for every other kind.
    pub fn max_row_count(&self) -> Option<Result<u64>> {
        match &self.kind {
            StepKind::Source(source) => Some(source.max_row_count()),
            StepKind::Function(_) | StepKind::Sink(_) => None,
        }
    }

    /// Write mode of a sink step; `None` for every other kind.
    pub fn write_mode(&self) -> Option<WriteMode> {
        match &self.kind {
            StepKind::Sink(sink) => Some(sink.write_mode()),
            StepKind::Function(_) | StepKind::Source(_) => None,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            StepKind::Function(_) => "function",
            StepKind::Source(_) => "source",
            StepKind::Sink(_) => "sink",
        };
        formatter
            .debug_struct("Step")
            .field("id", &self.id)
            .field("kind", &kind)
            .field("parameters", &self.parameters)
            .field("outputs", &self.outputs)
            .field("error_policy", &self.error_policy)
            .finish_non_exhaustive()
    }
}

/// Explicit declaration of a step's parameters, values, and outputs.
pub struct StepBuilder {
    id: String,
    name: Option<String>,
    parameters: Vec<Parameter>,
    explicit_values: IndexMap<String, Datum>,
    outputs: Vec<String>,
    output_overrides: IndexMap<String, String>,
    error_policy: ErrorPolicy,
    needs_run_state: bool,
    kind: StepKind,
}

impl StepBuilder {
    fn new(id: String, kind: StepKind) -> Self {
        Self {
            id,
            name: None,
            parameters: Vec::new(),
            explicit_values: IndexMap::new(),
            outputs: Vec::new(),
            output_overrides: IndexMap::new(),
            error_policy: ErrorPolicy::default(),
            needs_run_state: false,
            kind,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declares a required parameter. Declaring [`RUN_STATE_PARAMETER`] requests the live run
    /// state instead.
    pub fn parameter(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if name == RUN_STATE_PARAMETER {
            self.needs_run_state = true;
        }
        self.parameters.push(Parameter { name, default: None });
        self
    }

    /// Declares a parameter that falls back to `default` when no explicit value is supplied.
    pub fn parameter_with_default(mut self, name: impl Into<String>, default: impl Into<Datum>) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    /// Supplies an explicit value for a declared parameter.
    pub fn value(mut self, parameter: impl Into<String>, value: impl Into<Datum>) -> Self {
        self.explicit_values.insert(parameter.into(), value.into());
        self
    }

    /// Declares the next output, written to run state in return order.
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Writes the declared output `declared` under `target` instead.
    pub fn rename_output(mut self, declared: impl Into<String>, target: impl Into<String>) -> Self {
        self.output_overrides.insert(declared.into(), target.into());
        self
    }

    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Hands the live run state to the step on every invocation.
    pub fn needs_run_state(mut self) -> Self {
        self.needs_run_state = true;
        self
    }

    /// Validates the declaration and produces the step.
    pub fn build(mut self) -> Result<Step, ConfigurationError> {
        if self.id.trim().is_empty() {
            return Err(ConfigurationError::EmptyIdentifier);
        }

        if let Some(parameter) = self
            .explicit_values
            .keys()
            .find(|name| !self.parameters.iter().any(|parameter| &parameter.name == *name))
        {
            return Err(ConfigurationError::UnknownParameter {
                step_id: self.id.clone(),
                parameter: parameter.clone(),
            });
        }

        match self.kind {
            StepKind::Source(_) => {
                if self.outputs.is_empty() {
                    self.outputs.push(self.id.clone());
                }
                if self.outputs.len() != 1 {
                    return Err(ConfigurationError::InvalidOutputs {
                        step_id: self.id.clone(),
                        reason: format!("a source produces exactly one dataset, {} declared", self.outputs.len()),
                    });
                }
            }
            StepKind::Sink(_) => {
                if !self.outputs.is_empty() {
                    return Err(ConfigurationError::InvalidOutputs {
                        step_id: self.id.clone(),
                        reason: "a sink does not produce outputs".to_string(),
                    });
                }
            }
            StepKind::Function(_) => {}
        }

        if let Some(output) = self.output_overrides.keys().find(|declared| !self.outputs.contains(declared)) {
            return Err(ConfigurationError::UnknownOutput {
                step_id: self.id.clone(),
                output: output.clone(),
            });
        }

        Ok(Step {
            id: self.id,
            name: self.name,
            parameters: self.parameters,
            explicit_values: self.explicit_values,
            outputs: self.outputs,
            output_overrides: self.output_overrides,
            error_policy: self.error_policy,
            needs_run_state: self.needs_run_state,
            kind: self.kind,
        })
    }
}

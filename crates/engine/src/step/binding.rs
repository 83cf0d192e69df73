//! Parameter binding and output routing.
//!
//! Each declared parameter is resolved, in order of precedence, from the explicit value given
//! when the step was built, the parameter's declared default, and finally a lookup by name in
//! the live run state. The reserved [`RUN_STATE_PARAMETER`] is never bound; the run state
//! itself is lent to the call instead. Values returned by the step are written back to run
//! state under their declared (or overridden) output names.

use anyhow::anyhow;
use chunkflow_types::{Datum, RowRange};
use indexmap::IndexMap;
use tracing::debug;

use super::{RUN_STATE_PARAMETER, Step, StepCall, StepKind};
use crate::error::{ParameterError, StepExecutionError};
use crate::run_state::RunState;

impl Step {
    /// Resolves every declared parameter against explicit values, defaults, and run state.
    pub fn bind_arguments(&self, run_state: &RunState) -> Result<IndexMap<String, Datum>, ParameterError> {
        let mut arguments = IndexMap::with_capacity(self.parameters.len());

        for parameter in &self.parameters {
            if parameter.name == RUN_STATE_PARAMETER {
                continue;
            }

            let value = self
                .explicit_values
                .get(&parameter.name)
                .cloned()
                .or_else(|| parameter.default.clone())
                .or_else(|| run_state.lookup(&parameter.name))
                .ok_or_else(|| ParameterError::Unresolved {
                    step_id: self.id.clone(),
                    parameter: parameter.name.clone(),
                })?;

            arguments.insert(parameter.name.clone(), value);
        }

        Ok(arguments)
    }

    /// Parameters that can only be bound from run state: no explicit value and no default.
    pub(crate) fn state_inputs(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(|parameter| {
                parameter.name != RUN_STATE_PARAMETER
                    && parameter.default.is_none()
                    && !self.explicit_values.contains_key(&parameter.name)
            })
            .map(|parameter| parameter.name.as_str())
    }

    /// Binds arguments, runs the step once, and writes its outputs into `run_state`.
    ///
    /// Run state is only modified after the step returns successfully; a failing step leaves
    /// its outputs unwritten.
    pub(crate) fn invoke(&mut self, run_state: &mut RunState, coordinate: Option<RowRange>) -> Result<(), StepExecutionError> {
        let arguments = self.bind_arguments(run_state)?;
        let step_id = self.id.as_str();

        let values = match &mut self.kind {
            StepKind::Function(function) => {
                let lent_state = if self.needs_run_state { Some(&mut *run_state) } else { None };
                let mut call = StepCall::new(step_id, arguments, coordinate, lent_state);
                function(&mut call).map_err(|error| StepExecutionError::failed(step_id, error))?
            }
            StepKind::Source(source) => {
                debug!(step_id = %step_id, start = coordinate.map(|range| range.start), count = coordinate.map(|range| range.count), "reading source rows");
                let table = source.read(coordinate).map_err(|error| StepExecutionError::failed(step_id, error))?;
                vec![Datum::from(table)]
            }
            StepKind::Sink(sink) => {
                let input = self.parameters.first().map(|parameter| parameter.name.as_str()).unwrap_or_default();
                let table = match arguments.get(input) {
                    Some(Datum::Table(table)) => table,
                    _ => {
                        return Err(StepExecutionError::failed(
                            step_id,
                            anyhow!("sink input '{}' is not a dataset", input),
                        ));
                    }
                };
                debug!(step_id = %step_id, input = %input, rows = table.row_count(), "writing sink rows");
                sink.write(table).map_err(|error| StepExecutionError::failed(step_id, error))?;
                Vec::new()
            }
        };

        self.route_outputs(values, run_state)
    }

    /// Removes this step's outputs from run state after an ignored failure.
    pub(crate) fn clear_outputs(&self, run_state: &mut RunState) {
        for name in self.output_names() {
            run_state.remove(name);
        }
    }

    fn route_outputs(&self, values: Vec<Datum>, run_state: &mut RunState) -> Result<(), StepExecutionError> {
        if values.len() != self.outputs.len() {
            return Err(StepExecutionError::OutputArity {
                step_id: self.id.clone(),
                expected: self.outputs.len(),
                actual: values.len(),
            });
        }

        for (declared, value) in self.outputs.iter().zip(values) {
            run_state.store(self.output_name(declared), value);
        }
        Ok(())
    }
}

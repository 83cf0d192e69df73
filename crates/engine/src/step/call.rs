//! The view a function step gets of its bound arguments.

use anyhow::{Result, anyhow};
use chunkflow_types::{Datum, RowRange, Table};
use indexmap::IndexMap;
use serde_json::Value;

use crate::run_state::RunState;

/// Arguments bound for one invocation, plus the optional coordinate and run state.
pub struct StepCall<'a> {
    step_id: &'a str,
    arguments: IndexMap<String, Datum>,
    coordinate: Option<RowRange>,
    run_state: Option<&'a mut RunState>,
}

impl<'a> StepCall<'a> {
    pub(crate) fn new(
        step_id: &'a str,
        arguments: IndexMap<String, Datum>,
        coordinate: Option<RowRange>,
        run_state: Option<&'a mut RunState>,
    ) -> Self {
        Self {
            step_id,
            arguments,
            coordinate,
            run_state,
        }
    }

    pub fn step_id(&self) -> &str {
        self.step_id
    }

    /// Row range assigned for this pass, when the step is scheduled by coordinate.
    pub fn coordinate(&self) -> Option<RowRange> {
        self.coordinate
    }

    pub fn argument(&self, name: &str) -> Option<&Datum> {
        self.arguments.get(name)
    }

    /// Moves an argument out of the call.
    pub fn take(&mut self, name: &str) -> Option<Datum> {
        self.arguments.shift_remove(name)
    }

    /// Borrows a bound argument that must be a dataset.
    pub fn table(&self, name: &str) -> Result<&Table> {
        match self.arguments.get(name) {
            Some(Datum::Table(table)) => Ok(table.as_ref()),
            Some(Datum::Scalar(_)) => Err(anyhow!("argument '{}' of step '{}' is not a dataset", name, self.step_id)),
            None => Err(anyhow!("step '{}' has no argument named '{}'", self.step_id, name)),
        }
    }

    /// Borrows a bound argument that must be a scalar.
    pub fn scalar(&self, name: &str) -> Result<&Value> {
        match self.arguments.get(name) {
            Some(Datum::Scalar(value)) => Ok(value),
            Some(Datum::Table(_)) => Err(anyhow!("argument '{}' of step '{}' is a dataset, not a scalar", name, self.step_id)),
            None => Err(anyhow!("step '{}' has no argument named '{}'", self.step_id, name)),
        }
    }

    /// Live run state, available when the step declared that it needs it.
    pub fn run_state(&mut self) -> Result<&mut RunState> {
        let step_id = self.step_id;
        self.run_state
            .as_deref_mut()
            .ok_or_else(|| anyhow!("step '{}' did not declare the run_state parameter", step_id))
    }

    pub fn has_run_state(&self) -> bool {
        self.run_state.is_some()
    }
}

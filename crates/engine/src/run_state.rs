//! Shared run state threaded through every step invocation.
//!
//! The run state owns the named datasets and named variables produced so far. The pass
//! executor holds the only instance for the duration of a run and lends it to one step at a
//! time through `&mut RunState`, so no locking is involved. A name lives in exactly one of the
//! two tables: storing a dataset under a variable's name replaces the variable and vice versa.
//!
//! Datasets are held behind [`Arc`]. Binding one to a step parameter or cloning the whole
//! run state for a checkpoint shares the rows; mutation through [`RunState::dataset_mut`]
//! copies them first when they are shared, so a clone never observes later writes.

use std::sync::Arc;

use chunkflow_types::{Datum, Table};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named datasets and variables for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    #[serde(default)]
    datasets: IndexMap<String, Arc<Table>>,
    #[serde(default)]
    variables: IndexMap<String, Value>,
}

/// Lightweight counts describing a run state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStateMetadata {
    pub dataset_count: usize,
    pub variable_count: usize,
    pub total_rows: u64,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a dataset, replacing any dataset or variable with the same name.
    pub fn insert_dataset(&mut self, name: impl Into<String>, table: Table) {
        self.insert_shared_dataset(name, Arc::new(table));
    }

    fn insert_shared_dataset(&mut self, name: impl Into<String>, table: Arc<Table>) {
        let name = name.into();
        self.variables.shift_remove(&name);
        self.datasets.insert(name, table);
    }

    /// Stores a variable, replacing any dataset or variable with the same name.
    pub fn insert_variable(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.datasets.shift_remove(&name);
        self.variables.insert(name, value);
    }

    pub fn dataset(&self, name: &str) -> Option<&Table> {
        self.datasets.get(name).map(Arc::as_ref)
    }

    /// Mutable access; rows shared with a bound argument or a checkpoint are copied first.
    pub fn dataset_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.datasets.get_mut(name).map(Arc::make_mut)
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Stores a datum under `name`, routing tables to datasets and scalars to variables.
    pub fn store(&mut self, name: impl Into<String>, datum: Datum) {
        match datum {
            Datum::Table(table) => self.insert_shared_dataset(name, table),
            Datum::Scalar(value) => self.insert_variable(name, value),
        }
    }

    /// Looks a name up among datasets first, then variables. Datasets come back shared.
    pub fn lookup(&self, name: &str) -> Option<Datum> {
        if let Some(table) = self.datasets.get(name) {
            return Some(Datum::Table(Arc::clone(table)));
        }
        self.variables.get(name).cloned().map(Datum::Scalar)
    }

    /// Removes whatever is stored under `name`.
    pub fn remove(&mut self, name: &str) -> Option<Datum> {
        if let Some(table) = self.datasets.shift_remove(name) {
            return Some(Datum::Table(table));
        }
        self.variables.shift_remove(name).map(Datum::Scalar)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.datasets.contains_key(name) || self.variables.contains_key(name)
    }

    pub fn dataset_names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn metadata(&self) -> RunStateMetadata {
        RunStateMetadata {
            dataset_count: self.datasets.len(),
            variable_count: self.variables.len(),
            total_rows: self.datasets.values().map(|table| table.row_count()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty() && self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_are_unique_across_datasets_and_variables() {
        let mut run_state = RunState::new();
        run_state.insert_variable("orders", json!(3));
        run_state.insert_dataset("orders", Table::with_columns(["id"]));

        assert!(run_state.variable("orders").is_none());
        assert!(run_state.dataset("orders").is_some());
        assert_eq!(run_state.metadata().dataset_count, 1);
        assert_eq!(run_state.metadata().variable_count, 0);
    }

    #[test]
    fn lookup_prefers_datasets_and_shares_rows() {
        let mut run_state = RunState::new();
        let mut table = Table::with_columns(["id"]);
        table.push_row(vec![json!(1)]).expect("row");
        run_state.insert_dataset("orders", table);
        run_state.insert_variable("threshold", json!(10));

        let Some(Datum::Table(mut bound)) = run_state.lookup("orders") else {
            panic!("expected dataset");
        };
        assert!(std::ptr::eq(bound.as_ref(), run_state.dataset("orders").expect("dataset")));
        Arc::make_mut(&mut bound).rows.clear();
        assert_eq!(run_state.dataset("orders").expect("dataset").row_count(), 1);
        assert_eq!(run_state.lookup("threshold"), Some(Datum::Scalar(json!(10))));
        assert_eq!(run_state.lookup("missing"), None);
    }

    #[test]
    fn clone_is_unaffected_by_later_dataset_writes() {
        let mut run_state = RunState::new();
        let mut table = Table::with_columns(["id"]);
        table.push_row(vec![json!(1)]).expect("row");
        run_state.insert_dataset("orders", table);

        let snapshot = run_state.clone();
        run_state.dataset_mut("orders").expect("dataset").rows.clear();

        assert_eq!(snapshot.dataset("orders").expect("dataset").row_count(), 1);
        assert!(run_state.dataset("orders").expect("dataset").is_empty());
    }

    #[test]
    fn remove_clears_either_table() {
        let mut run_state = RunState::new();
        run_state.store("total", Datum::Scalar(json!(42)));
        assert!(run_state.contains("total"));
        assert_eq!(run_state.remove("total"), Some(Datum::Scalar(json!(42))));
        assert!(!run_state.contains("total"));
        assert!(run_state.is_empty());
    }
}

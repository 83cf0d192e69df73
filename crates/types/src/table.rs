//! In-memory tabular data exchanged between steps.
//!
//! A [`Table`] is deliberately small: named columns and rows of JSON cells. Format adapters
//! (CSV, spreadsheets, SQL) convert into and out of this shape; the engine itself only slices,
//! appends, and shares tables.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::RowRange;

/// Error raised when two tables cannot be combined.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TableError {
    /// The appended slice declares a different column set.
    #[error("column mismatch: expected [{expected}], found [{found}]")]
    ColumnMismatch { expected: String, found: String },
    /// A row does not have one cell per column.
    #[error("row {row} has {cells} cells but the table declares {columns} columns")]
    RowWidth { row: usize, cells: usize, columns: usize },
}

/// Named columns plus row-major cell storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Table {
    /// Column names in declaration order.
    pub columns: Vec<String>,
    /// Rows, each holding exactly one cell per column.
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Creates an empty table with the given columns.
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a single row after checking its width.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                row: self.rows.len(),
                cells: row.len(),
                columns: self.columns.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Number of rows currently stored.
    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copies the rows covered by `range`. Rows beyond the end of the table are ignored, so a
    /// range reaching past the last row yields a shorter slice rather than an error.
    pub fn slice(&self, range: RowRange) -> Table {
        let total = self.rows.len();
        let start = usize::try_from(range.start).unwrap_or(usize::MAX).min(total);
        let end = usize::try_from(range.end()).unwrap_or(usize::MAX).min(total);
        Table {
            columns: self.columns.clone(),
            rows: self.rows[start..end].to_vec(),
        }
    }

    /// Appends every row of `other`. An empty, column-less table adopts the columns of the
    /// first slice appended to it.
    pub fn append(&mut self, other: &Table) -> Result<(), TableError> {
        if self.columns.is_empty() && self.rows.is_empty() {
            self.columns = other.columns.clone();
        }
        if self.columns != other.columns {
            return Err(TableError::ColumnMismatch {
                expected: self.columns.join(", "),
                found: other.columns.join(", "),
            });
        }
        self.rows.extend(other.rows.iter().cloned());
        Ok(())
    }

    /// Returns the cells of a named column, if present.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.columns.iter().position(|column| column == name)?;
        Some(self.rows.iter().filter_map(|row| row.get(index)).collect())
    }
}

/// A value stored in run state or passed between steps.
///
/// Tables are reference counted, so binding a dataset to a step parameter shares it instead
/// of copying its rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Datum {
    /// A tabular dataset.
    Table(Arc<Table>),
    /// A scalar or structured JSON value.
    Scalar(Value),
}

impl Datum {
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Datum::Table(table) => Some(table.as_ref()),
            Datum::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Datum::Scalar(value) => Some(value),
            Datum::Table(_) => None,
        }
    }
}

impl From<Table> for Datum {
    fn from(table: Table) -> Self {
        Datum::Table(Arc::new(table))
    }
}

impl From<Value> for Datum {
    fn from(value: Value) -> Self {
        Datum::Scalar(value)
    }
}

//! In-memory sources and sinks.
//!
//! These adapters back tests, demos, and the CLI simulation. They implement the same
//! [`Source`] and [`Sink`] traits a file or database adapter would.

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use chunkflow_types::{RowRange, Table, WriteMode};
use serde_json::json;

use crate::step::{Sink, Source};

/// Serves rows from a table held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    table: Table,
    chunk_size: Option<u64>,
}

impl MemorySource {
    pub fn new(table: Table) -> Self {
        Self { table, chunk_size: None }
    }

    /// Enables chunked reads of `chunk_size` rows.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }
}

impl Source for MemorySource {
    fn chunk_size(&self) -> Option<u64> {
        self.chunk_size
    }

    fn max_row_count(&self) -> Result<u64> {
        Ok(self.table.row_count())
    }

    fn read(&mut self, range: Option<RowRange>) -> Result<Table> {
        Ok(match range {
            Some(range) => self.table.slice(range),
            None => self.table.clone(),
        })
    }
}

/// Generates numbered rows on demand without holding them in memory.
///
/// Every row has the columns `row` (its zero-based position) and `source` (the label given at
/// construction), so slices written to a sink can be traced back to their origin.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    label: String,
    rows: u64,
    chunk_size: Option<u64>,
}

impl SyntheticSource {
    pub fn new(label: impl Into<String>, rows: u64) -> Self {
        Self {
            label: label.into(),
            rows,
            chunk_size: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: Option<u64>) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

impl Source for SyntheticSource {
    fn chunk_size(&self) -> Option<u64> {
        self.chunk_size
    }

    fn max_row_count(&self) -> Result<u64> {
        Ok(self.rows)
    }

    fn read(&mut self, range: Option<RowRange>) -> Result<Table> {
        let range = range.unwrap_or(RowRange::new(0, self.rows));
        let end = range.end().min(self.rows);
        let mut table = Table::with_columns(["row", "source"]);
        for row in range.start.min(end)..end {
            table.push_row(vec![json!(row), json!(self.label)])?;
        }
        Ok(table)
    }
}

/// Collects written slices into a shared table.
#[derive(Debug, Clone)]
pub struct MemorySink {
    destination: Arc<Mutex<Table>>,
    mode: WriteMode,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    /// Appending sink with an empty destination.
    pub fn new() -> Self {
        Self {
            destination: Arc::new(Mutex::new(Table::default())),
            mode: WriteMode::Append,
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Handle to the destination table, shared with the sink.
    pub fn destination(&self) -> Arc<Mutex<Table>> {
        Arc::clone(&self.destination)
    }

    /// Copy of everything written so far.
    pub fn snapshot(&self) -> Result<Table> {
        let destination = self.destination.lock().map_err(|_| anyhow!("sink destination lock poisoned"))?;
        Ok(destination.clone())
    }
}

impl Sink for MemorySink {
    fn write_mode(&self) -> WriteMode {
        self.mode
    }

    fn write(&mut self, table: &Table) -> Result<()> {
        let mut destination = self.destination.lock().map_err(|_| anyhow!("sink destination lock poisoned"))?;
        match self.mode {
            WriteMode::Append => destination.append(table)?,
            WriteMode::Overwrite => *destination = table.clone(),
        }
        Ok(())
    }
}

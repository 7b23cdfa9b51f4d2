//! Table schema accumulation across the page stream
//!
//! Column sets only grow: a new column is appended at the end of its table's
//! schema the first time any row carries it, and existing columns never move.

use crate::error::{MeltError, Result};
use crate::melt::types::{FlatRecord, Row};
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

/// Columns and buffered rows of one table
#[derive(Debug, Clone, Default)]
struct TableBuffer {
    columns: IndexSet<String>,
    rows: Vec<Row>,
}

impl TableBuffer {
    fn extend_columns<'a>(&mut self, keys: impl IntoIterator<Item = &'a String>) {
        for key in keys {
            if !self.columns.contains(key) {
                self.columns.insert(key.clone());
            }
        }
    }

    fn new_column_count(&self, row: &Row, pending: &mut IndexSet<String>) -> usize {
        for key in row.keys() {
            if !self.columns.contains(key) {
                pending.insert(key.clone());
            }
        }
        self.columns.len() + pending.len()
    }
}

/// A table whose schema is final, with every row aligned to it
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatedTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Merges per-record column sets into one superset schema per table
#[derive(Debug, Clone, Default)]
pub struct SchemaAccumulator {
    tables: IndexMap<String, TableBuffer>,
    max_columns: Option<usize>,
}

impl SchemaAccumulator {
    pub fn new(max_columns: Option<usize>) -> Self {
        SchemaAccumulator {
            tables: IndexMap::new(),
            max_columns,
        }
    }

    /// Start from the columns a previous run wrote, so existing headers keep their order
    pub fn with_previous_columns<'a, I>(mut self, previous: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a Vec<String>)>,
    {
        for (table, columns) in previous {
            self.tables
                .entry(table.clone())
                .or_default()
                .extend_columns(columns.iter());
        }
        self
    }

    /// Make a table known before any row arrives, with its leading columns
    pub fn register(&mut self, table: &str, columns: &[String]) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .extend_columns(columns.iter());
    }

    /// Record one row, growing the table schema with any unseen column
    pub fn observe(&mut self, table: &str, row: Row) -> Result<()> {
        if let Some(limit) = self.max_columns {
            let mut pending = IndexSet::new();
            let width = self
                .tables
                .get(table)
                .map(|buffer| buffer.new_column_count(&row, &mut pending))
                .unwrap_or(row.len());
            if width > limit {
                return Err(MeltError::ColumnLimit {
                    table: table.to_string(),
                    limit,
                });
            }
        }

        let buffer = self.tables.entry(table.to_string()).or_default();
        buffer.extend_columns(row.keys());
        let aligned = align(&buffer.columns, row);
        buffer.rows.push(aligned);
        Ok(())
    }

    /// Record every row of a batch of flattened records, or none of them.
    ///
    /// The column limit is checked for the whole batch before anything is stored.
    pub fn observe_all(&mut self, batch: Vec<FlatRecord>) -> Result<()> {
        if let Some(limit) = self.max_columns {
            let mut pending: IndexMap<&str, IndexSet<String>> = IndexMap::new();
            for record in &batch {
                for (table, rows) in record {
                    let new_columns = pending.entry(table.as_str()).or_default();
                    let empty = TableBuffer::default();
                    let buffer = self.tables.get(table).unwrap_or(&empty);
                    for row in rows {
                        if buffer.new_column_count(row, new_columns) > limit {
                            return Err(MeltError::ColumnLimit {
                                table: table.clone(),
                                limit,
                            });
                        }
                    }
                }
            }
        }

        for record in batch {
            for (table, rows) in record {
                let buffer = self.tables.entry(table).or_default();
                for row in rows {
                    buffer.extend_columns(row.keys());
                    let aligned = align(&buffer.columns, row);
                    buffer.rows.push(aligned);
                }
            }
        }

        Ok(())
    }

    /// Current schema of a table, in first-seen order
    pub fn columns(&self, table: &str) -> Option<Vec<&str>> {
        self.tables
            .get(table)
            .map(|buffer| buffer.columns.iter().map(String::as_str).collect())
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map(|buffer| buffer.rows.len()).unwrap_or(0)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Finalize every table, re-aligning buffered rows to the final schema
    pub fn finish(self) -> Vec<AccumulatedTable> {
        self.tables
            .into_iter()
            .map(|(name, buffer)| {
                let rows = buffer
                    .rows
                    .into_iter()
                    .map(|row| align(&buffer.columns, row))
                    .collect();
                AccumulatedTable {
                    name,
                    columns: buffer.columns.into_iter().collect(),
                    rows,
                }
            })
            .collect()
    }
}

/// Reorder a row to the schema, filling columns it lacks with null
pub fn align(columns: &IndexSet<String>, mut row: Row) -> Row {
    columns
        .iter()
        .map(|column| {
            let value = row.remove(column).unwrap_or(Value::Null);
            (column.clone(), value)
        })
        .collect()
}

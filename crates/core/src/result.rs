//! Materialized query results

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// One result row
pub type Row = Vec<Value>;

/// Column metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Column name
    pub name: String,
}

impl Field {
    /// Create a field
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Fully materialized result of a single or batch execution
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column metadata, empty for DML
    pub fields: Vec<Field>,
    /// Rows, in shard dispatch order
    pub rows: Vec<Row>,
    /// Rows changed by DML
    pub rows_affected: u64,
    /// Last auto-generated id, 0 when none
    pub insert_id: u64,
}

impl QueryResult {
    /// An empty result (no fields, no rows)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Check if there are no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Position of a column by name
    pub fn column(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Append the rows of a later shard's result
    ///
    /// Fields are taken from the first non-empty field list.
    pub fn append(&mut self, other: QueryResult) {
        if self.fields.is_empty() {
            self.fields = other.fields;
        }
        self.rows.extend(other.rows);
        self.rows_affected += other.rows_affected;
        if other.insert_id != 0 {
            self.insert_id = other.insert_id;
        }
    }
}

impl IntoIterator for QueryResult {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

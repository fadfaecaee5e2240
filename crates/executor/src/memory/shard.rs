//! Shard storage of the in-memory backend.
//!
//! A shard owns a key range and a set of tables. Every stored row carries
//! the keyspace id it was routed by, so a request addressed by keyspace
//! ids, key ranges or entity ids sees only the rows it addressed.

use std::collections::{BTreeMap, BTreeSet};

use shardgate_core::{Error, Field, KeyRange, QueryResult, Result, Row, RpcCode, Value};

/// A row plus the keyspace id that routed it
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredRow {
    pub ksid: Vec<u8>,
    pub values: Row,
}

#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<StoredRow>,
}

impl Table {
    pub(crate) fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub(crate) fn column(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                Error::transport(RpcCode::BadInput, format!("unknown column '{}'", name))
            })
    }

    pub(crate) fn fields(&self) -> Vec<Field> {
        self.columns.iter().map(Field::new).collect()
    }
}

/// Which rows of a shard a request addressed
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Scope {
    /// Every row (shard-targeted requests)
    Whole,
    /// Rows routed by one of these keyspace ids
    Ids(BTreeSet<Vec<u8>>),
    /// Rows whose keyspace id falls in one of these ranges
    Ranges(Vec<KeyRange>),
    /// Rows matching one (entity, keyspace id) pair on the entity column
    Entities {
        column: String,
        pairs: BTreeSet<(Vec<u8>, Vec<u8>)>,
    },
}

impl Scope {
    /// Widen this scope by another addressing of the same kind
    pub(crate) fn merge(&mut self, other: Scope) {
        match (self, other) {
            (Scope::Ids(ids), Scope::Ids(more)) => ids.extend(more),
            (Scope::Ranges(ranges), Scope::Ranges(more)) => ranges.extend(more),
            (Scope::Entities { pairs, .. }, Scope::Entities { pairs: more, .. }) => pairs.extend(more),
            (this, other) => *this = other,
        }
    }
}

/// A scope plus an optional `col = value` condition, bound to one table
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RowFilter {
    scope: Scope,
    entity_column: Option<usize>,
    condition: Option<(usize, Value)>,
}

impl RowFilter {
    pub(crate) fn bind(table: &Table, scope: Scope, condition: Option<(&str, Value)>) -> Result<Self> {
        let entity_column = match &scope {
            Scope::Entities { column, .. } => Some(table.column(column)?),
            _ => None,
        };
        let condition = match condition {
            Some((column, value)) => Some((table.column(column)?, value)),
            None => None,
        };
        Ok(Self {
            scope,
            entity_column,
            condition,
        })
    }

    pub(crate) fn matches(&self, row: &StoredRow) -> bool {
        let in_scope = match &self.scope {
            Scope::Whole => true,
            Scope::Ids(ids) => ids.contains(&row.ksid),
            Scope::Ranges(ranges) => ranges.iter().any(|r| r.contains(&row.ksid)),
            Scope::Entities { pairs, .. } => {
                let entity = self
                    .entity_column
                    .and_then(|i| row.values.get(i))
                    .and_then(entity_key);
                match entity {
                    Some(entity) => pairs.contains(&(entity, row.ksid.clone())),
                    None => false,
                }
            }
        };
        in_scope
            && self
                .condition
                .as_ref()
                .map_or(true, |(i, value)| row.values.get(*i) == Some(value))
    }
}

/// Byte form of an entity column value
fn entity_key(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Bytes(b) => Some(b.clone()),
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Int(n) => Some(n.to_string().into_bytes()),
        Value::Uint(n) => Some(n.to_string().into_bytes()),
        Value::Null | Value::Float(_) => None,
    }
}

/// A write staged in a shard-local transaction or applied directly
#[derive(Debug, Clone)]
pub(crate) enum Write {
    Insert { table: String, row: StoredRow },
    Delete { table: String, filter: RowFilter },
}

impl Write {
    pub(crate) fn table(&self) -> &str {
        match self {
            Write::Insert { table, .. } | Write::Delete { table, .. } => table,
        }
    }

    /// Apply to `rows`, returning the number of rows changed
    pub(crate) fn apply(&self, rows: &mut Vec<StoredRow>) -> u64 {
        match self {
            Write::Insert { row, .. } => {
                rows.push(row.clone());
                1
            }
            Write::Delete { filter, .. } => {
                let before = rows.len();
                rows.retain(|r| !filter.matches(r));
                (before - rows.len()) as u64
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Shard {
    pub name: String,
    pub range: KeyRange,
    pub tables: BTreeMap<String, Table>,
}

impl Shard {
    pub(crate) fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| {
            Error::transport(RpcCode::BadInput, format!("table '{}' does not exist", name))
        })
    }

    /// Committed rows of `table` with `staged` writes replayed on top
    pub(crate) fn view(&self, table: &str, staged: &[Write]) -> Result<Vec<StoredRow>> {
        let mut rows = self.table(table)?.rows.clone();
        for write in staged.iter().filter(|w| w.table() == table) {
            write.apply(&mut rows);
        }
        Ok(rows)
    }

    /// Apply a write to the committed rows
    pub(crate) fn apply(&mut self, write: &Write) -> Result<u64> {
        let table = self.tables.get_mut(write.table()).ok_or_else(|| {
            Error::transport(
                RpcCode::BadInput,
                format!("table '{}' does not exist", write.table()),
            )
        })?;
        Ok(write.apply(&mut table.rows))
    }
}

/// Project `rows` of `table` onto `columns` (all when `None`)
pub(crate) fn project(table: &Table, rows: Vec<StoredRow>, columns: Option<&[String]>) -> Result<QueryResult> {
    let (fields, rows) = match columns {
        None => (table.fields(), rows.into_iter().map(|r| r.values).collect()),
        Some(columns) => {
            let indexes = columns
                .iter()
                .map(|c| table.column(c))
                .collect::<Result<Vec<_>>>()?;
            let fields = indexes.iter().map(|&i| Field::new(table.columns[i].clone())).collect();
            let rows = rows
                .into_iter()
                .map(|r| indexes.iter().map(|&i| r.values[i].clone()).collect())
                .collect();
            (fields, rows)
        }
    };
    Ok(QueryResult {
        fields,
        rows,
        ..QueryResult::default()
    })
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Cell, TableRef};

/// Kind of a row-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowChangeKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for RowChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowChangeKind::Insert => f.write_str("insert"),
            RowChangeKind::Update => f.write_str("update"),
            RowChangeKind::Delete => f.write_str("delete"),
        }
    }
}

/// One row-level change produced by a single statement.
///
/// For [`RowChangeKind::Update`], `rows` alternates old and new images.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub kind: RowChangeKind,
    pub rows: Vec<Vec<Cell>>,
}

/// Ordered row changes a transaction applied to one table.
///
/// `statement` is the originating statement text when the source attached it, kept for
/// diagnostics only.
#[derive(Debug, Clone, PartialEq)]
pub struct TableBatch {
    pub table: TableRef,
    pub statement: String,
    pub changes: Vec<RowChange>,
}

impl TableBatch {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            statement: String::new(),
            changes: Vec::new(),
        }
    }

    /// Returns true when no row changes were accumulated.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

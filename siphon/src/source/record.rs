use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Cell, TableRef};

/// Kind of a row-change record as declared by the source driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowsKind {
    Insert,
    Update,
    Delete,
    /// A row-change kind this pipeline does not handle; its rows are dropped.
    Unsupported,
}

/// A decoded replication-log record, as produced by a source driver.
///
/// This is the full input alphabet of the stream consumer. Drivers are expected to
/// decode the raw log transport into these records; everything they cannot or need not
/// express maps to [`LogRecord::Ignored`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    /// The running position of the stream advanced to `sequence` for `source_uuid`.
    PositionAdvance { source_uuid: Uuid, sequence: u64 },
    /// A transaction begins.
    Begin,
    /// The current transaction commits.
    Commit,
    /// Subsequent row changes belong to `table`.
    TableReference { table: TableRef },
    /// Informational statement text for the currently referenced table's changes.
    RowsQuery { query: String },
    /// Typed row images for the currently referenced table.
    Rows { kind: RowsKind, rows: Vec<Vec<Cell>> },
    /// A non-transactional schema change statement.
    Statement { schema: String, query: String },
    /// A record with no replication meaning (rotate, format description, heartbeat).
    Ignored,
}

use serde::{Deserialize, Serialize};

/// A single column value in a replicated row image.
///
/// The value space is a small closed set: replication row images carry scalars only,
/// and anything the source driver cannot express as one of these arrives as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Cell {
    /// Renders the value as a SQL literal, for delete predicates and key tuples.
    pub fn sql_literal(&self) -> String {
        match self {
            Cell::Null => "NULL".to_string(),
            Cell::Int(value) => value.to_string(),
            Cell::Float(value) => value.to_string(),
            Cell::Text(value) => format!("'{}'", value.replace('\'', "''")),
            Cell::Bytes(value) => {
                let text = String::from_utf8_lossy(value);
                format!("'{}'", text.replace('\'', "''"))
            }
        }
    }

    /// Renders the value as a CSV field for the bulk-load artifact.
    ///
    /// Nulls are emitted as a bare, unquoted `NULL` marker; every other value is
    /// quoted, so a text value that happens to spell `NULL` stays distinguishable and
    /// round-trips losslessly.
    pub fn csv_field(&self) -> String {
        match self {
            Cell::Null => "NULL".to_string(),
            Cell::Int(value) => quote_csv(&value.to_string()),
            Cell::Float(value) => quote_csv(&value.to_string()),
            Cell::Text(value) => quote_csv(value),
            Cell::Bytes(value) => quote_csv(&String::from_utf8_lossy(value)),
        }
    }
}

fn quote_csv(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Computes the canonical key of a full row image.
///
/// The key is the comma-joined SQL-literal rendering of every cell. Inserts are
/// deduplicated and insert/delete pairs are cancelled by this key, which makes
/// same-window compaction work even for tables without a declared key.
pub fn row_key(cells: &[Cell]) -> String {
    cells
        .iter()
        .map(Cell::sql_literal)
        .collect::<Vec<_>>()
        .join(",")
}

/// Renders a full row image as one CSV record (without terminator).
pub fn csv_record(cells: &[Cell]) -> String {
    cells
        .iter()
        .map(Cell::csv_field)
        .collect::<Vec<_>>()
        .join(",")
}

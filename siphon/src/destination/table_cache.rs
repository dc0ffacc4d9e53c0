//! Per-table staging cache: schema metadata, pending writes, and the dedup rules
//! that collapse redundant work inside one flush window.
//!
//! Inserts are keyed by the canonical serialization of the full row image and the last
//! insert per key wins. A delete staged for a key that is still pending as an insert
//! cancels the insert instead of producing a physical write. Deletes execute before
//! inserts at flush time, batched through the table's lead constraint when one exists.

use std::collections::HashMap;

use tracing::warn;

use crate::destination::base::{ConstraintKind, TableConstraint, TableMeta};
use crate::destination::enums::{EnumColumn, rehydrate};
use crate::types::{Cell, TableRef, csv_record, row_key};

/// Staging area for one destination table.
#[derive(Debug)]
pub(crate) struct TableCache {
    table: TableRef,
    /// Column names in destination ordinal order.
    columns: Vec<String>,
    /// Catalog constraints, kept for snapshots.
    constraints: Vec<TableConstraint>,
    /// Ordinals of the lead constraint's columns, ascending. Empty when the table has
    /// no usable primary or unique key.
    lead_key: Vec<usize>,
    enums: Vec<EnumColumn>,
    /// Canonical row key -> CSV record. At most one entry per key.
    pending_inserts: HashMap<String, String>,
    /// Rendered key tuples, or full delete statements when no lead key exists.
    pending_deletes: Vec<String>,
}

impl TableCache {
    /// Builds a cache from freshly fetched catalog metadata.
    pub fn build(table: TableRef, meta: TableMeta) -> Self {
        let lead_key = lead_key_ordinals(&table, &meta);

        Self {
            table,
            columns: meta.columns,
            constraints: meta.constraints,
            lead_key,
            enums: meta.enums,
            pending_inserts: HashMap::new(),
            pending_deletes: Vec::new(),
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Names of the lead constraint's columns, in ordinal order.
    pub fn lead_key_columns(&self) -> Vec<String> {
        self.lead_key
            .iter()
            .filter_map(|&ordinal| self.columns.get(ordinal).cloned())
            .collect()
    }

    pub fn enum_column_count(&self) -> usize {
        self.enums.len()
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    pub fn pending_insert_count(&self) -> usize {
        self.pending_inserts.len()
    }

    pub fn pending_delete_count(&self) -> usize {
        self.pending_deletes.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_inserts.is_empty() || !self.pending_deletes.is_empty()
    }

    /// Stages row images for insertion. The last insert for a given key wins.
    pub fn stage_inserts(&mut self, rows: Vec<Vec<Cell>>) {
        for mut row in rows {
            rehydrate(&self.enums, &mut row);

            let key = row_key(&row);
            let record = csv_record(&row);

            if let Some(existing) = self.pending_inserts.get(&key)
                && existing != &record
            {
                warn!(
                    table = %self.table,
                    old = %existing,
                    new = %record,
                    "insert collision, newest row wins"
                );
            }

            self.pending_inserts.insert(key, record);
        }
    }

    /// Stages row images for deletion.
    ///
    /// A delete whose key is still pending as an insert cancels that insert; the pair
    /// nets to nothing. Otherwise a delete descriptor is appended: the lead-key tuple
    /// when a lead constraint exists, a full-row predicate statement otherwise.
    pub fn stage_deletes(&mut self, rows: Vec<Vec<Cell>>) {
        for mut row in rows {
            rehydrate(&self.enums, &mut row);

            let key = row_key(&row);
            if self.pending_inserts.remove(&key).is_some() {
                continue;
            }

            self.pending_deletes.push(self.delete_descriptor(&row));
        }
    }

    /// Renders the executable delete statements, consuming pack-sized chunks of key
    /// tuples per statement. Full-predicate descriptors are already complete
    /// statements and pass through one by one.
    pub fn delete_statements(&self, pack: usize) -> Vec<String> {
        if self.lead_key.is_empty() {
            return self.pending_deletes.clone();
        }

        let key_columns = self
            .lead_key_columns()
            .iter()
            .map(|name| format!("\"{name}\""))
            .collect::<Vec<_>>();
        let key_list = if key_columns.len() == 1 {
            key_columns[0].clone()
        } else {
            format!("({})", key_columns.join(","))
        };

        self.pending_deletes
            .chunks(pack.max(1))
            .map(|chunk| {
                format!(
                    "DELETE FROM {} WHERE {} IN ({})",
                    self.table.quoted(),
                    key_list,
                    chunk.join(",")
                )
            })
            .collect()
    }

    /// Renders the pending inserts as a CSV bulk-load artifact, one record per line.
    pub fn insert_artifact(&self) -> String {
        let mut artifact = String::new();
        for record in self.pending_inserts.values() {
            artifact.push_str(record);
            artifact.push('\n');
        }

        artifact
    }

    pub fn clear_deletes(&mut self) {
        self.pending_deletes.clear();
    }

    pub fn clear_inserts(&mut self) {
        self.pending_inserts.clear();
    }

    /// Statement refreshing the destination's statistics for this table.
    pub fn analyze_statement(&self) -> String {
        format!("ANALYZE {}", self.table.quoted())
    }

    fn delete_descriptor(&self, row: &[Cell]) -> String {
        if self.lead_key.is_empty() {
            let mut predicates = Vec::with_capacity(self.columns.len());
            for (ordinal, column) in self.columns.iter().enumerate() {
                let Some(cell) = row.get(ordinal) else {
                    continue;
                };
                match cell {
                    Cell::Null => predicates.push(format!("\"{column}\" IS NULL")),
                    cell => predicates.push(format!("\"{column}\"={}", cell.sql_literal())),
                }
            }

            return format!(
                "DELETE FROM {} WHERE {}",
                self.table.quoted(),
                predicates.join(" AND ")
            );
        }

        let values = self
            .lead_key
            .iter()
            .filter_map(|&ordinal| row.get(ordinal))
            .map(Cell::sql_literal)
            .collect::<Vec<_>>()
            .join(",");

        if self.lead_key.len() == 1 {
            values
        } else {
            format!("({values})")
        }
    }
}

/// Selects the lead constraint and resolves its columns to ordinals.
///
/// The lead constraint is the primary key when one exists, otherwise the first unique
/// key. Constraints naming columns absent from the column order are unusable and
/// skipped.
fn lead_key_ordinals(table: &TableRef, meta: &TableMeta) -> Vec<usize> {
    let candidates = meta
        .constraints
        .iter()
        .filter(|constraint| constraint.kind == ConstraintKind::PrimaryKey)
        .chain(
            meta.constraints
                .iter()
                .filter(|constraint| constraint.kind == ConstraintKind::Unique),
        );

    for constraint in candidates {
        let mut ordinals = Vec::with_capacity(constraint.columns.len());
        for column in &constraint.columns {
            match meta.columns.iter().position(|name| name == column) {
                Some(ordinal) => ordinals.push(ordinal),
                None => {
                    warn!(
                        %table,
                        column = %column,
                        "constraint names a column missing from the column order"
                    );
                    ordinals.clear();
                    break;
                }
            }
        }

        if !ordinals.is_empty() {
            ordinals.sort_unstable();
            return ordinals;
        }
    }

    Vec::new()
}

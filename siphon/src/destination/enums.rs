//! Enum column metadata and ordinal-to-label rehydration.
//!
//! The warehouse has no native enum type, so enum label lists are stashed in the
//! destination table's comment at table-creation time, one entry per enum column in
//! the form `enum(N["a","b"])`, `;`-separated. Row images arrive with enum values
//! coded as 1-based label ordinals and are rehydrated to their labels before hashing
//! and serialization, so keys and artifacts always carry the label text.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::Cell;

/// Label list for one enum-coded column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumColumn {
    /// 1-based ordinal of the column in the table's column order.
    pub column: usize,
    /// Labels in declaration order; a coded value of `n` selects `labels[n - 1]`.
    pub labels: Vec<String>,
}

impl EnumColumn {
    /// Serializes into the table-comment entry form.
    pub fn serialize(&self) -> String {
        let labels = self
            .labels
            .iter()
            .map(|label| format!("\"{label}\""))
            .collect::<Vec<_>>()
            .join(",");

        format!("enum({}[{labels}])", self.column)
    }

    /// Parses one table-comment entry of the form `enum(N["a","b"])`.
    fn parse(entry: &str) -> Option<EnumColumn> {
        let body = entry.trim().strip_prefix("enum(")?.strip_suffix(")")?;
        let (column, labels) = body.split_once('[')?;
        let labels = labels.strip_suffix(']')?;

        let column: usize = column.trim().parse().ok()?;
        let labels = labels
            .split(',')
            .map(|label| label.trim().trim_matches(['"', '\'']).to_string())
            .collect();

        Some(EnumColumn { column, labels })
    }
}

/// Parses the enum metadata stored in a table comment.
///
/// Entries that do not match the expected form are skipped: a table comment is also
/// writable by humans.
pub fn parse_enum_metadata(comment: &str) -> Vec<EnumColumn> {
    comment
        .split(';')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| {
            let parsed = EnumColumn::parse(entry);
            if parsed.is_none() {
                debug!(entry, "skipping table comment entry without enum metadata");
            }
            parsed
        })
        .collect()
}

/// Rehydrates enum-coded ordinals in a row image to their labels.
///
/// A coded value of `0` is the source's "invalid/empty" member and becomes empty
/// text. Out-of-range ordinals also degrade to empty text, with a warning.
pub fn rehydrate(enums: &[EnumColumn], row: &mut [Cell]) {
    for column in enums {
        let Some(cell) = row.get_mut(column.column.wrapping_sub(1)) else {
            continue;
        };

        if let Cell::Int(coded) = *cell {
            let label = match usize::try_from(coded) {
                Ok(0) => String::new(),
                Ok(ordinal) if ordinal <= column.labels.len() => {
                    column.labels[ordinal - 1].clone()
                }
                _ => {
                    warn!(
                        column = column.column,
                        coded, "enum ordinal outside the label list"
                    );
                    String::new()
                }
            };
            *cell = Cell::Text(label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_through_the_comment_form() {
        let column = EnumColumn {
            column: 3,
            labels: vec!["new".to_string(), "paid".to_string(), "void".to_string()],
        };

        let serialized = column.serialize();
        assert_eq!(serialized, "enum(3[\"new\",\"paid\",\"void\"])");

        let parsed = parse_enum_metadata(&serialized);
        assert_eq!(parsed, vec![column]);
    }

    #[test]
    fn multiple_entries_are_semicolon_separated() {
        let parsed = parse_enum_metadata("enum(1[\"a\"]);enum(4[\"x\",\"y\"])");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].column, 4);
        assert_eq!(parsed[1].labels, vec!["x", "y"]);
    }

    #[test]
    fn unrelated_comment_text_is_skipped() {
        assert!(parse_enum_metadata("orders fact table, ask data-eng").is_empty());
    }

    #[test]
    fn rehydrate_maps_ordinals_to_labels() {
        let enums = vec![EnumColumn {
            column: 2,
            labels: vec!["red".to_string(), "green".to_string()],
        }];

        let mut row = vec![Cell::Int(7), Cell::Int(2), Cell::Null];
        rehydrate(&enums, &mut row);
        assert_eq!(
            row,
            vec![Cell::Int(7), Cell::Text("green".to_string()), Cell::Null]
        );
    }

    #[test]
    fn zero_and_out_of_range_ordinals_become_empty_text() {
        let enums = vec![EnumColumn {
            column: 1,
            labels: vec!["only".to_string()],
        }];

        let mut zero = vec![Cell::Int(0)];
        rehydrate(&enums, &mut zero);
        assert_eq!(zero, vec![Cell::Text(String::new())]);

        let mut out_of_range = vec![Cell::Int(9)];
        rehydrate(&enums, &mut out_of_range);
        assert_eq!(out_of_range, vec![Cell::Text(String::new())]);
    }

    #[test]
    fn non_integer_cells_are_left_alone() {
        let enums = vec![EnumColumn {
            column: 1,
            labels: vec!["a".to_string()],
        }];

        let mut row = vec![Cell::Text("already".to_string())];
        rehydrate(&enums, &mut row);
        assert_eq!(row, vec![Cell::Text("already".to_string())]);
    }
}

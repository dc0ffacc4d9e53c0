use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a destination table: (schema, name).
///
/// This pair is the unique key for table caches and destination objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Renders the fully-qualified, quoted identifier for SQL statements.
    pub fn quoted(&self) -> String {
        format!(
            "\"{}\".\"{}\"",
            self.schema.replace('"', "\"\""),
            self.name.replace('"', "\"\"")
        )
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_escapes_embedded_quotes() {
        let table = TableRef::new("shop", "we\"ird");
        assert_eq!(table.quoted(), "\"shop\".\"we\"\"ird\"");
    }
}

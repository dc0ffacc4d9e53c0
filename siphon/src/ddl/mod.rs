//! The DDL Compiler seam.
//!
//! Translating source schema statements into warehouse statements is an external
//! capability consumed through [`DdlCompiler`]. The built-in
//! [`ConservativeCompiler`] only classifies statement classes that are plainly
//! irrelevant to the warehouse as no-ops; everything else is routed to manual review,
//! never silently skipped.

use crate::error::SiphonResult;
use crate::types::TableRef;

/// Result of compiling one schema change statement.
#[derive(Debug, Clone, PartialEq)]
pub enum DdlOutcome {
    /// The statement needs nothing applied at the destination.
    NoOp,
    /// The statement translated into destination statements.
    Applied {
        /// Destination-native statements to execute, in order.
        statements: Vec<String>,
        /// Table caches that must be invalidated because the statement structurally
        /// alters them (column or key changes shift ordinals).
        invalidates: Vec<TableRef>,
    },
    /// The statement cannot be translated safely and requires operator action.
    ManualReview,
}

/// Compiles source schema statements into destination actions.
pub trait DdlCompiler: Send + 'static {
    /// Compiles `statement`, issued against `default_schema`.
    fn compile(&self, statement: &str, default_schema: &str) -> SiphonResult<DdlOutcome>;
}

/// Statement prefixes that never affect replicated warehouse state.
const NOOP_PREFIXES: &[&str] = &[
    "GRANT",
    "REVOKE",
    "FLUSH",
    "ANALYZE",
    "OPTIMIZE",
    "REPAIR",
    "SET",
    "CREATE USER",
    "ALTER USER",
    "DROP USER",
    "RENAME USER",
];

/// A compiler that defers everything non-trivial to manual review.
///
/// This is the default wiring when no real DDL compiler is plugged in: the pipeline
/// stays correct (it blocks on anything it cannot prove irrelevant) at the cost of
/// operator involvement for every real schema change.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConservativeCompiler;

impl ConservativeCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl DdlCompiler for ConservativeCompiler {
    fn compile(&self, statement: &str, _default_schema: &str) -> SiphonResult<DdlOutcome> {
        let normalized = statement.trim().to_uppercase();

        for prefix in NOOP_PREFIXES {
            if normalized.starts_with(prefix) {
                return Ok(DdlOutcome::NoOp);
            }
        }

        Ok(DdlOutcome::ManualReview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_and_flushes_are_noops() {
        let compiler = ConservativeCompiler::new();
        for statement in [
            "GRANT SELECT ON shop.* TO 'reporting'@'%'",
            "flush privileges",
            "  SET GLOBAL max_connections = 500",
            "CREATE USER 'loader'@'%' IDENTIFIED BY 'x'",
        ] {
            assert_eq!(
                compiler.compile(statement, "shop").unwrap(),
                DdlOutcome::NoOp,
                "expected {statement:?} to be a no-op"
            );
        }
    }

    #[test]
    fn structural_statements_require_review() {
        let compiler = ConservativeCompiler::new();
        for statement in [
            "ALTER TABLE orders ADD COLUMN note text",
            "CREATE TABLE carts (id int primary key)",
            "DROP TABLE old_orders",
            "RENAME TABLE a TO b",
            "TRUNCATE TABLE orders",
        ] {
            assert_eq!(
                compiler.compile(statement, "shop").unwrap(),
                DdlOutcome::ManualReview,
                "expected {statement:?} to require review"
            );
        }
    }
}

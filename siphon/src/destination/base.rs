use std::future::Future;

use crate::destination::enums::EnumColumn;
use crate::error::SiphonResult;
use crate::types::TableRef;

/// Kind of a table constraint usable as a natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
}

/// A primary or unique constraint as reported by the warehouse catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct TableConstraint {
    pub kind: ConstraintKind,
    /// Names of the constrained columns, in constraint order.
    pub columns: Vec<String>,
}

/// Catalog metadata for one destination table, fetched once per table cache.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableMeta {
    /// Column names in ordinal order.
    pub columns: Vec<String>,
    /// Primary and unique constraints, in catalog order.
    pub constraints: Vec<TableConstraint>,
    /// Enum-coded columns and their label lists.
    pub enums: Vec<EnumColumn>,
}

/// Result of one bulk-load operation.
#[derive(Debug, Clone, Default)]
pub struct CopyOutcome {
    /// Number of records loaded.
    pub loaded: u64,
    /// Per-record reject descriptions reported by the loader. Rejects are logged by
    /// the engine, not retried.
    pub rejected: Vec<String>,
}

/// The analytical warehouse the pipeline writes to.
///
/// The implementation owns a single connection which is used exclusively by the
/// destination engine loop; every method takes `&mut self` to make that ownership
/// explicit. A flush brackets its writes with [`Warehouse::begin`] /
/// [`Warehouse::commit`] so that batched deletes, bulk inserts and the position update
/// land atomically, and positions stay at their previous committed values when
/// anything fails.
pub trait Warehouse: Send + 'static {
    /// Returns the name of the warehouse implementation.
    fn name() -> &'static str;

    /// Fetches catalog metadata for `table`, or [`None`] when the table does not
    /// exist at the destination.
    fn table_meta(
        &mut self,
        table: &TableRef,
    ) -> impl Future<Output = SiphonResult<Option<TableMeta>>> + Send;

    /// Executes one SQL statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str) -> impl Future<Output = SiphonResult<u64>> + Send;

    /// Opens the flush transaction.
    fn begin(&mut self) -> impl Future<Output = SiphonResult<()>> + Send;

    /// Commits the flush transaction.
    fn commit(&mut self) -> impl Future<Output = SiphonResult<()>> + Send;

    /// Rolls back the flush transaction.
    fn rollback(&mut self) -> impl Future<Output = SiphonResult<()>> + Send;

    /// Bulk-loads a CSV artifact (one record per line, nulls as unquoted `NULL`)
    /// into `table`.
    fn copy_rows(
        &mut self,
        table: &TableRef,
        artifact: String,
    ) -> impl Future<Output = SiphonResult<CopyOutcome>> + Send;

    /// Creates the durable position store when it does not exist yet.
    fn ensure_position_store(&mut self) -> impl Future<Output = SiphonResult<()>> + Send;

    /// Reads the last committed position string for `source`.
    fn load_position(
        &mut self,
        source: &str,
    ) -> impl Future<Output = SiphonResult<Option<String>>> + Send;

    /// Writes the position string for `source`. Participates in the open flush
    /// transaction when one is active.
    fn save_position(
        &mut self,
        source: &str,
        position: &str,
    ) -> impl Future<Output = SiphonResult<()>> + Send;
}

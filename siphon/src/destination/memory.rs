//! In-memory warehouse for tests and development.
//!
//! Mirrors the transactional behavior of a real warehouse: writes issued between
//! [`Warehouse::begin`] and [`Warehouse::commit`] are staged and only become visible
//! on commit, and a rollback (or an injected commit failure) discards them. Catalog
//! metadata is scripted per table, and every applied statement and bulk artifact is
//! recorded for inspection.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::destination::base::{CopyOutcome, TableMeta, Warehouse};
use crate::error::{ErrorKind, SiphonResult};
use crate::types::TableRef;

/// Everything a warehouse transaction can write.
#[derive(Debug, Clone, Default)]
struct Ledger {
    statements: Vec<String>,
    artifacts: Vec<(TableRef, String)>,
    positions: HashMap<String, String>,
}

impl Ledger {
    fn merge(&mut self, other: Ledger) {
        self.statements.extend(other.statements);
        self.artifacts.extend(other.artifacts);
        self.positions.extend(other.positions);
    }
}

#[derive(Debug, Default)]
struct Inner {
    metas: HashMap<TableRef, TableMeta>,
    meta_fetches: HashMap<TableRef, usize>,
    committed: Ledger,
    staged: Option<Ledger>,
    fail_next_commit: bool,
    queued_rejects: Vec<String>,
}

impl Inner {
    /// The ledger writes currently land in: the staged transaction when one is open,
    /// the committed state otherwise (autocommit).
    fn active_ledger(&mut self) -> &mut Ledger {
        self.staged.as_mut().unwrap_or(&mut self.committed)
    }
}

/// In-memory [`Warehouse`] implementation.
///
/// Clones share state, so tests can keep a handle for assertions while the engine owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the catalog metadata returned for `table`.
    pub async fn set_table_meta(&self, table: TableRef, meta: TableMeta) {
        let mut inner = self.inner.lock().await;
        inner.metas.insert(table, meta);
    }

    /// Makes the next commit fail, discarding the staged transaction.
    pub async fn fail_next_commit(&self) {
        let mut inner = self.inner.lock().await;
        inner.fail_next_commit = true;
    }

    /// Queues reject descriptions reported by the next bulk load.
    pub async fn queue_rejects(&self, rejects: Vec<String>) {
        let mut inner = self.inner.lock().await;
        inner.queued_rejects = rejects;
    }

    /// Returns every committed statement, in execution order.
    pub async fn statements(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.committed.statements.clone()
    }

    /// Returns every committed bulk artifact, in load order.
    pub async fn artifacts(&self) -> Vec<(TableRef, String)> {
        let inner = self.inner.lock().await;
        inner.committed.artifacts.clone()
    }

    /// Returns the committed position for `source`.
    pub async fn position(&self, source: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.committed.positions.get(source).cloned()
    }

    /// Returns how many times catalog metadata was fetched for `table`.
    pub async fn meta_fetches(&self, table: &TableRef) -> usize {
        let inner = self.inner.lock().await;
        inner.meta_fetches.get(table).copied().unwrap_or(0)
    }
}

impl Warehouse for MemoryWarehouse {
    fn name() -> &'static str {
        "memory"
    }

    async fn table_meta(&mut self, table: &TableRef) -> SiphonResult<Option<TableMeta>> {
        let mut inner = self.inner.lock().await;
        *inner.meta_fetches.entry(table.clone()).or_insert(0) += 1;

        Ok(inner.metas.get(table).cloned())
    }

    async fn execute(&mut self, sql: &str) -> SiphonResult<u64> {
        let mut inner = self.inner.lock().await;

        info!(sql, "memory warehouse executing statement");

        inner.active_ledger().statements.push(sql.to_string());

        Ok(1)
    }

    async fn begin(&mut self) -> SiphonResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.staged.is_some() {
            bail!(ErrorKind::InvalidState, "transaction already open");
        }

        inner.staged = Some(Ledger::default());
        Ok(())
    }

    async fn commit(&mut self) -> SiphonResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.fail_next_commit {
            inner.fail_next_commit = false;
            inner.staged = None;
            bail!(
                ErrorKind::DestinationQueryFailed,
                "injected commit failure"
            );
        }

        let Some(staged) = inner.staged.take() else {
            bail!(ErrorKind::InvalidState, "no transaction to commit");
        };
        inner.committed.merge(staged);

        Ok(())
    }

    async fn rollback(&mut self) -> SiphonResult<()> {
        let mut inner = self.inner.lock().await;
        inner.staged = None;

        Ok(())
    }

    async fn copy_rows(&mut self, table: &TableRef, artifact: String) -> SiphonResult<CopyOutcome> {
        let mut inner = self.inner.lock().await;

        let loaded = artifact.lines().count() as u64;
        let rejected = std::mem::take(&mut inner.queued_rejects);

        info!(table = %table, loaded, "memory warehouse loading artifact");

        inner.active_ledger().artifacts.push((table.clone(), artifact));

        Ok(CopyOutcome { loaded, rejected })
    }

    async fn ensure_position_store(&mut self) -> SiphonResult<()> {
        Ok(())
    }

    async fn load_position(&mut self, source: &str) -> SiphonResult<Option<String>> {
        let inner = self.inner.lock().await;
        Ok(inner.committed.positions.get(source).cloned())
    }

    async fn save_position(&mut self, source: &str, position: &str) -> SiphonResult<()> {
        let mut inner = self.inner.lock().await;

        inner
            .active_ledger()
            .positions
            .insert(source.to_string(), position.to_string());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn staged_writes_are_invisible_until_commit() {
        let warehouse = MemoryWarehouse::new();
        let mut handle = warehouse.clone();

        handle.begin().await.unwrap();
        handle.execute("DELETE FROM \"s\".\"t\" WHERE \"id\" IN (1)").await.unwrap();
        handle.save_position("src", "a:1-1").await.unwrap();

        assert!(warehouse.statements().await.is_empty());
        assert_eq!(warehouse.position("src").await, None);

        handle.commit().await.unwrap();

        assert_eq!(warehouse.statements().await.len(), 1);
        assert_eq!(warehouse.position("src").await.as_deref(), Some("a:1-1"));
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let warehouse = MemoryWarehouse::new();
        let mut handle = warehouse.clone();

        handle.begin().await.unwrap();
        handle.save_position("src", "a:1-1").await.unwrap();
        handle.rollback().await.unwrap();

        assert_eq!(warehouse.position("src").await, None);
    }

    #[tokio::test]
    async fn failed_commit_leaves_committed_state_untouched(){
        let warehouse = MemoryWarehouse::new();
        let mut handle = warehouse.clone();

        handle.save_position("src", "a:1-1").await.unwrap();
        warehouse.fail_next_commit().await;

        handle.begin().await.unwrap();
        handle.save_position("src", "a:1-9").await.unwrap();
        assert!(handle.commit().await.is_err());

        assert_eq!(warehouse.position("src").await.as_deref(), Some("a:1-1"));
    }

    #[tokio::test]
    async fn autocommit_writes_apply_directly() {
        let warehouse = MemoryWarehouse::new();
        let mut handle = warehouse.clone();

        handle.execute("ANALYZE \"s\".\"t\"").await.unwrap();
        assert_eq!(warehouse.statements().await, vec!["ANALYZE \"s\".\"t\""]);
    }
}

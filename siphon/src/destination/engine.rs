//! The destination engine: a single-consumer loop applying pipeline events to the
//! warehouse.
//!
//! The engine is the only place that mutates table caches or issues warehouse
//! statements, which removes any locking discipline across tables by construction.
//! Control surfaces observe it through two narrow handles: [`InspectHandle`] reads a
//! snapshot the engine refreshes, and [`SkipHandle`] releases a schema statement
//! parked for manual review.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use siphon_config::shared::FlushConfig;
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::bail;
use crate::concurrency::review::ManualReviewGate;
use crate::ddl::{DdlCompiler, DdlOutcome};
use crate::destination::base::Warehouse;
use crate::destination::table_cache::TableCache;
use crate::error::{ErrorKind, SiphonResult};
use crate::position::Position;
use crate::types::{
    Cell, PipelineEvent, RowChangeKind, SchemaChangeEvent, TableRef, TransactionEvent,
};

/// Positions confirmed committed at the destination, shared with the reconnect
/// supervisor. Seeded from the durable store at startup and updated only after a
/// successful commit, so its contents always equal durable state.
pub(crate) type CommittedPositions = Arc<Mutex<HashMap<String, Position>>>;

/// Read-only summary of one table cache.
#[derive(Debug, Clone)]
pub struct TableCacheSnapshot {
    pub table: TableRef,
    pub pending_inserts: usize,
    pub pending_deletes: usize,
    pub columns: Vec<String>,
    pub lead_key_columns: Vec<String>,
    pub enum_columns: usize,
    pub constraints: usize,
}

/// Read-only summary of the engine's staging state.
#[derive(Debug, Clone, Default)]
pub struct EngineSnapshot {
    /// Latest tracked position string per source (committed or pending).
    pub positions: HashMap<String, String>,
    /// One entry per live table cache.
    pub tables: Vec<TableCacheSnapshot>,
    /// Transactions staged since the last flush.
    pub staged_transactions: usize,
}

/// Handle for reading the engine's state concurrently with the processing loop.
#[derive(Debug, Clone, Default)]
pub struct InspectHandle {
    shared: Arc<Mutex<EngineSnapshot>>,
}

impl InspectHandle {
    /// Returns a copy of the most recent snapshot.
    pub async fn snapshot(&self) -> EngineSnapshot {
        self.shared.lock().await.clone()
    }
}

/// Handle for resolving schema statements parked for manual review.
#[derive(Debug, Clone, Default)]
pub struct SkipHandle {
    gate: ManualReviewGate,
}

impl SkipHandle {
    /// Skips the parked statement, unblocking the engine, and returns its text.
    ///
    /// Returns [`None`] when nothing is blocked.
    pub async fn skip(&self) -> Option<String> {
        self.gate.take().await
    }

    /// Returns the parked statement without unblocking the engine.
    pub async fn pending(&self) -> Option<String> {
        self.gate.pending().await
    }
}

/// The single-consumer destination engine.
pub struct DestinationEngine<W, C> {
    warehouse: W,
    compiler: C,
    flush: FlushConfig,
    caches: HashMap<TableRef, TableCache>,
    /// Latest tracked position per source; written wholesale on every flush.
    positions: HashMap<String, Position>,
    staged: usize,
    last_flush: Instant,
    review: ManualReviewGate,
    inspect: Arc<Mutex<EngineSnapshot>>,
    committed: CommittedPositions,
}

impl<W, C> DestinationEngine<W, C>
where
    W: Warehouse,
    C: DdlCompiler,
{
    /// Creates an engine over an exclusively owned warehouse connection.
    ///
    /// `committed` must be pre-seeded with the durable positions the coordinator read
    /// at startup.
    pub(crate) fn new(
        warehouse: W,
        compiler: C,
        flush: FlushConfig,
        review: ManualReviewGate,
        inspect: Arc<Mutex<EngineSnapshot>>,
        committed: CommittedPositions,
    ) -> Self {
        Self {
            warehouse,
            compiler,
            flush,
            caches: HashMap::new(),
            positions: HashMap::new(),
            staged: 0,
            last_flush: Instant::now(),
            review,
            inspect,
            committed,
        }
    }

    /// Runs the processing loop until the shutdown sentinel, channel closure, or a
    /// fatal error.
    pub async fn run(mut self, mut events_rx: mpsc::Receiver<PipelineEvent>) -> SiphonResult<()> {
        info!(warehouse = W::name(), "destination engine started");

        let idle_tick = Duration::from_millis(self.flush.idle_tick_ms);
        self.last_flush = Instant::now();

        loop {
            let event = match timeout(idle_tick, events_rx.recv()).await {
                Ok(Some(event)) => Some(event),
                Ok(None) => {
                    debug!("event channel closed, stopping engine");
                    break;
                }
                // Idle tick: no event, but time-based flushes still get a chance.
                Err(_) => None,
            };

            match event {
                Some(PipelineEvent::Transaction(event)) => {
                    self.stage_transaction(event).await?;
                }
                Some(PipelineEvent::SchemaChange(event)) => {
                    self.apply_schema_change(event).await?;
                    self.refresh_snapshot().await;
                    continue;
                }
                Some(PipelineEvent::Shutdown) => {
                    info!("shutdown sentinel received, draining queued events");
                    self.drain(&mut events_rx).await?;
                    break;
                }
                None => {}
            }

            if self.should_flush() {
                self.flush().await?;
            }
            self.refresh_snapshot().await;
        }

        if self.staged > 0 {
            self.flush().await?;
        }

        info!("destination engine stopped");
        Ok(())
    }

    /// Processes whatever is already queued, without waiting for more.
    async fn drain(&mut self, events_rx: &mut mpsc::Receiver<PipelineEvent>) -> SiphonResult<()> {
        while let Ok(event) = events_rx.try_recv() {
            match event {
                PipelineEvent::Transaction(event) => self.stage_transaction(event).await?,
                PipelineEvent::SchemaChange(event) => self.apply_schema_change(event).await?,
                PipelineEvent::Shutdown => {}
            }
        }

        Ok(())
    }

    fn should_flush(&self) -> bool {
        self.staged >= self.flush.max_transactions
            || (self.staged > 0
                && self.last_flush.elapsed() >= Duration::from_millis(self.flush.max_fill_ms))
    }

    /// Stages every table batch of one transaction into the table caches.
    async fn stage_transaction(&mut self, event: TransactionEvent) -> SiphonResult<()> {
        for batch in event.tables {
            if !self.caches.contains_key(&batch.table) {
                let Some(meta) = self.warehouse.table_meta(&batch.table).await? else {
                    bail!(
                        ErrorKind::DestinationTableMissing,
                        "replicated table does not exist at the destination",
                        batch.table
                    );
                };
                self.caches.insert(
                    batch.table.clone(),
                    TableCache::build(batch.table.clone(), meta),
                );
            }
            let Some(cache) = self.caches.get_mut(&batch.table) else {
                continue;
            };

            for change in batch.changes {
                match change.kind {
                    RowChangeKind::Insert => cache.stage_inserts(change.rows),
                    RowChangeKind::Delete => cache.stage_deletes(change.rows),
                    RowChangeKind::Update => {
                        let (old, new) = split_update_rows(&batch.table, change.rows);
                        cache.stage_deletes(old);
                        cache.stage_inserts(new);
                    }
                }
            }
        }

        self.staged += 1;
        self.positions.insert(event.source, event.position);

        Ok(())
    }

    /// Applies one schema change event.
    ///
    /// Pending cached writes are flushed first: destination schema mutations must not
    /// run while staged rows still reference the old shape. Statements the compiler
    /// cannot handle, and destination failures while applying compiled statements,
    /// park the raw statement for manual review and block the loop until an operator
    /// skips it. Either way the source's position advances afterwards and is
    /// persisted immediately.
    async fn apply_schema_change(&mut self, event: SchemaChangeEvent) -> SiphonResult<()> {
        if self.staged > 0 {
            self.flush().await?;
        }

        let needs_review = match self.compiler.compile(&event.statement, &event.schema) {
            Ok(DdlOutcome::NoOp) => {
                debug!(statement = %event.statement, "schema statement needs nothing applied");
                false
            }
            Ok(DdlOutcome::Applied {
                statements,
                invalidates,
            }) => match self.execute_all(&statements).await {
                Ok(()) => {
                    for table in &invalidates {
                        if self.caches.remove(table).is_some() {
                            info!(table = %table, "table cache invalidated by schema change");
                        }
                    }
                    false
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        statement = %event.statement,
                        "compiled schema statements failed at the destination"
                    );
                    true
                }
            },
            Ok(DdlOutcome::ManualReview) => true,
            Err(err) => {
                warn!(
                    error = %err,
                    statement = %event.statement,
                    "schema statement could not be compiled"
                );
                true
            }
        };

        if needs_review {
            warn!(
                source = %event.source,
                statement = %event.statement,
                "schema statement requires manual review, pipeline is blocked until skipped"
            );
            self.refresh_snapshot().await;
            self.review.hold(event.statement.clone()).await;
            info!(source = %event.source, "blocked schema statement skipped by operator");

            // The operator resolved the statement externally and may have altered any
            // table; every cache's metadata is suspect now. Caches rebuild lazily.
            self.caches.clear();
        }

        self.positions
            .insert(event.source.clone(), event.position.clone());
        self.warehouse
            .save_position(&event.source, &event.position.to_string())
            .await?;
        self.committed
            .lock()
            .await
            .insert(event.source, event.position);

        Ok(())
    }

    async fn execute_all(&mut self, statements: &[String]) -> SiphonResult<()> {
        for sql in statements {
            let affected = self.warehouse.execute(sql).await?;
            debug!(affected, sql = %sql, "schema statement applied");
        }

        Ok(())
    }

    /// Flushes all pending cached work and the tracked positions as one atomic unit.
    ///
    /// On any failure the transaction is rolled back and the error is fatal: positions
    /// remain at their previous durably committed values and replay after restart
    /// converges through dedup.
    async fn flush(&mut self) -> SiphonResult<()> {
        let started = Instant::now();

        // Statistics refresh runs outside the flush transaction.
        let analyze: Vec<String> = self
            .caches
            .values()
            .filter(|cache| cache.has_pending())
            .map(|cache| cache.analyze_statement())
            .collect();
        for sql in analyze {
            self.warehouse.execute(&sql).await?;
        }

        if let Err(err) = self.flush_writes().await {
            warn!(error = %err, "flush failed, rolling back");
            let _ = self.warehouse.rollback().await;
            return Err(err);
        }

        {
            let mut committed = self.committed.lock().await;
            for (source, position) in &self.positions {
                committed.insert(source.clone(), position.clone());
            }
        }

        info!(
            transactions = self.staged,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "flushed staged transactions"
        );
        self.staged = 0;
        self.last_flush = Instant::now();

        Ok(())
    }

    async fn flush_writes(&mut self) -> SiphonResult<()> {
        self.warehouse.begin().await?;

        for cache in self.caches.values_mut() {
            if cache.pending_delete_count() > 0 {
                let deletes = cache.pending_delete_count();
                let statements = cache.delete_statements(self.flush.delete_pack);
                debug!(
                    table = %cache.table(),
                    deletes,
                    packs = statements.len(),
                    "executing batched deletes"
                );

                let mut affected = 0u64;
                for sql in &statements {
                    affected += self.warehouse.execute(sql).await?;
                }
                if affected != deletes as u64 {
                    debug!(
                        table = %cache.table(),
                        affected,
                        deletes,
                        "delete affected-row count differs from staged count"
                    );
                }
                cache.clear_deletes();
            }

            if cache.pending_insert_count() > 0 {
                let artifact = cache.insert_artifact();
                let outcome = self
                    .warehouse
                    .copy_rows(cache.table(), artifact)
                    .await?;
                for reject in &outcome.rejected {
                    warn!(table = %cache.table(), reject = %reject, "bulk load rejected a record");
                }
                debug!(table = %cache.table(), loaded = outcome.loaded, "bulk load finished");
                cache.clear_inserts();
            }
        }

        for (source, position) in &self.positions {
            self.warehouse
                .save_position(source, &position.to_string())
                .await?;
        }

        self.warehouse.commit().await?;

        Ok(())
    }

    /// Refreshes the shared read-only snapshot.
    async fn refresh_snapshot(&self) {
        let snapshot = EngineSnapshot {
            positions: self
                .positions
                .iter()
                .map(|(source, position)| (source.clone(), position.to_string()))
                .collect(),
            tables: self
                .caches
                .values()
                .map(|cache| TableCacheSnapshot {
                    table: cache.table().clone(),
                    pending_inserts: cache.pending_insert_count(),
                    pending_deletes: cache.pending_delete_count(),
                    columns: cache.columns().to_vec(),
                    lead_key_columns: cache.lead_key_columns(),
                    enum_columns: cache.enum_column_count(),
                    constraints: cache.constraint_count(),
                })
                .collect(),
            staged_transactions: self.staged,
        };

        *self.inspect.lock().await = snapshot;
    }
}

/// Builds the operator handle pair for a gate/snapshot set shared with an engine.
pub(crate) fn make_handles(
    review: &ManualReviewGate,
    inspect: &Arc<Mutex<EngineSnapshot>>,
) -> (SkipHandle, InspectHandle) {
    (
        SkipHandle {
            gate: review.clone(),
        },
        InspectHandle {
            shared: inspect.clone(),
        },
    )
}

/// Splits an update's alternating old/new images into delete and insert row sets.
fn split_update_rows(table: &TableRef, rows: Vec<Vec<Cell>>) -> (Vec<Vec<Cell>>, Vec<Vec<Cell>>) {
    if rows.len() % 2 != 0 {
        warn!(%table, rows = rows.len(), "update carries an unpaired row image");
    }

    let mut old = Vec::with_capacity(rows.len() / 2);
    let mut new = Vec::with_capacity(rows.len() / 2);
    for (index, row) in rows.into_iter().enumerate() {
        if index % 2 == 0 {
            old.push(row);
        } else {
            new.push(row);
        }
    }

    (old, new)
}

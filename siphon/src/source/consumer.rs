//! The per-source stream consumer.
//!
//! One consumer task runs per configured source. It folds decoded log records into
//! transaction-scoped events carrying a running position, applies per-schema
//! filtering at commit time, and forwards the surviving events to the destination
//! engine. A read timeout or a decode error terminates the consumer: it emits its
//! descriptor on the reconnect channel and returns, leaving resumption to the
//! coordinator.

use std::time::Duration;

use siphon_config::shared::{SchemaFilterConfig, SourceConfig};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::position::Position;
use crate::source::connector::LogStream;
use crate::source::record::{LogRecord, RowsKind};
use crate::types::{
    PipelineEvent, RowChange, RowChangeKind, SchemaChangeEvent, TableBatch, TransactionEvent,
};

/// Per-schema filter with its resume position parsed up front.
struct SchemaFilter {
    name: String,
    sync: Vec<String>,
    exclude: Vec<String>,
    resume: Option<Position>,
}

impl SchemaFilter {
    fn from_config(config: &SchemaFilterConfig) -> Self {
        let resume = config.resume_position.as_deref().and_then(|raw| {
            match raw.parse::<Position>() {
                Ok(position) => Some(position),
                Err(err) => {
                    warn!(
                        schema = %config.name,
                        error = %err,
                        "ignoring unparsable schema resume position"
                    );
                    None
                }
            }
        });

        Self {
            name: config.name.clone(),
            sync: config.sync.clone(),
            exclude: config.exclude.clone(),
            resume,
        }
    }
}

/// Runs the consumer loop for one source until shutdown, timeout, or stream error.
pub(crate) async fn run_consumer<S: LogStream>(
    source: SourceConfig,
    mut stream: S,
    start: Position,
    events_tx: mpsc::Sender<PipelineEvent>,
    reconnect_tx: mpsc::Sender<SourceConfig>,
    mut shutdown_rx: ShutdownRx,
) {
    let idle_timeout = Duration::from_secs(source.idle_timeout_secs);
    let mut filters: Vec<SchemaFilter> =
        source.schemas.iter().map(SchemaFilter::from_config).collect();

    let mut position = start;
    let mut tables: Vec<TableBatch> = Vec::new();
    let mut current: Option<TableBatch> = None;

    info!(source = %source.name, position = %position, "source consumer streaming");

    loop {
        let record = tokio::select! {
            _ = shutdown_rx.changed() => {
                info!(source = %source.name, "source consumer stopping on shutdown signal");
                return;
            }
            read = timeout(idle_timeout, stream.next_record()) => match read {
                Err(_) => {
                    warn!(
                        source = %source.name,
                        timeout_secs = source.idle_timeout_secs,
                        "no log record within the idle timeout, requesting reconnect"
                    );
                    let _ = reconnect_tx.send(source).await;
                    return;
                }
                Ok(Err(err)) => {
                    warn!(
                        source = %source.name,
                        error = %err,
                        "log stream failed, requesting reconnect"
                    );
                    let _ = reconnect_tx.send(source).await;
                    return;
                }
                Ok(Ok(record)) => record,
            }
        };

        match record {
            LogRecord::PositionAdvance {
                source_uuid,
                sequence,
            } => {
                position.advance(source_uuid, sequence);
            }
            LogRecord::Begin => {
                tables.clear();
                current = None;
            }
            LogRecord::TableReference { table } => {
                if let Some(batch) = current.take()
                    && !batch.is_empty()
                {
                    tables.push(batch);
                }
                current = Some(TableBatch::new(table));
            }
            LogRecord::RowsQuery { query } => {
                if let Some(batch) = current.as_mut() {
                    batch.statement = query;
                }
            }
            LogRecord::Rows { kind, rows } => {
                let Some(batch) = current.as_mut() else {
                    debug!(source = %source.name, "row change with no referenced table, dropping");
                    continue;
                };
                let kind = match kind {
                    RowsKind::Insert => RowChangeKind::Insert,
                    RowsKind::Update => RowChangeKind::Update,
                    RowsKind::Delete => RowChangeKind::Delete,
                    RowsKind::Unsupported => continue,
                };
                batch.changes.push(RowChange { kind, rows });
            }
            LogRecord::Statement { schema, query } => {
                let event = SchemaChangeEvent {
                    source: source.name.clone(),
                    position: position.clone(),
                    schema,
                    statement: query,
                };
                if events_tx
                    .send(PipelineEvent::SchemaChange(event))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            LogRecord::Commit => {
                if let Some(batch) = current.take()
                    && !batch.is_empty()
                {
                    tables.push(batch);
                }

                let batches = std::mem::take(&mut tables);
                let kept = apply_schema_filters(&mut filters, &position, batches);
                if kept.is_empty() {
                    continue;
                }

                let event = TransactionEvent {
                    source: source.name.clone(),
                    position: position.clone(),
                    tables: kept,
                };
                if events_tx
                    .send(PipelineEvent::Transaction(event))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            LogRecord::Ignored => {}
        }
    }
}

/// Applies per-schema filtering to a committed transaction's table batches.
///
/// With no filters configured, everything passes. Otherwise a batch survives only when
/// its schema has a filter entry, the transaction is past that schema's historical
/// resume position (which is cleared once overtaken), and the table passes the
/// sync/exclude lists.
fn apply_schema_filters(
    filters: &mut [SchemaFilter],
    position: &Position,
    batches: Vec<TableBatch>,
) -> Vec<TableBatch> {
    if filters.is_empty() {
        return batches;
    }

    let mut kept = Vec::new();
    for batch in batches {
        let Some(filter) = filters
            .iter_mut()
            .find(|filter| filter.name == batch.table.schema)
        else {
            continue;
        };

        if let Some(resume) = &filter.resume {
            if position.is_earlier_than(resume) {
                debug!(
                    table = %batch.table,
                    "dropping batch already covered by the schema resume position"
                );
                continue;
            }
            filter.resume = None;
        }

        let keep = if !filter.sync.is_empty() {
            filter.sync.iter().any(|name| *name == batch.table.name)
        } else if !filter.exclude.is_empty() {
            !filter.exclude.iter().any(|name| *name == batch.table.name)
        } else {
            true
        };

        if keep {
            kept.push(batch);
        }
    }

    kept
}

use std::fmt;

use crate::position::Position;
use crate::types::TableBatch;

/// A committed transaction's worth of filtered row changes from one source.
///
/// Table batches appear in the order tables were first referenced inside the
/// transaction. Empty transactions are never emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionEvent {
    /// Name of the source the transaction originated from.
    pub source: String,
    /// Replication position after this transaction.
    pub position: Position,
    /// Row changes grouped per table.
    pub tables: Vec<TableBatch>,
}

/// A non-transactional schema change statement from one source.
///
/// Schema change events are never filtered; the destination engine decides how to act
/// on them through the DDL compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaChangeEvent {
    /// Name of the source the statement originated from.
    pub source: String,
    /// Replication position after this statement.
    pub position: Position,
    /// Default schema the statement was issued against.
    pub schema: String,
    /// Raw statement text.
    pub statement: String,
}

/// A single event on the merged channel into the destination engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Filtered, transaction-scoped row changes.
    Transaction(TransactionEvent),
    /// A schema change statement.
    SchemaChange(SchemaChangeEvent),
    /// Sentinel asking the engine to drain queued events and stop.
    Shutdown,
}

impl PipelineEvent {
    /// Returns the [`EventType`] that corresponds to this event.
    pub fn event_type(&self) -> EventType {
        self.into()
    }
}

/// Lightweight classification of pipeline events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Transaction,
    SchemaChange,
    Shutdown,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Transaction => f.write_str("Transaction"),
            EventType::SchemaChange => f.write_str("SchemaChange"),
            EventType::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl From<&PipelineEvent> for EventType {
    fn from(event: &PipelineEvent) -> Self {
        match event {
            PipelineEvent::Transaction(_) => EventType::Transaction,
            PipelineEvent::SchemaChange(_) => EventType::SchemaChange,
            PipelineEvent::Shutdown => EventType::Shutdown,
        }
    }
}

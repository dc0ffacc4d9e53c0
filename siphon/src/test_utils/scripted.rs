//! Scripted source connector and DDL compiler.
//!
//! [`ScriptedConnector`] hands out pre-recorded record sequences, one script per
//! connection attempt, and records every connect call so tests can assert which
//! position a reconnect resumed from. [`ScriptedCompiler`] maps statement texts to
//! fixed [`DdlOutcome`]s.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use siphon_config::shared::SourceConfig;
use tokio::sync::Mutex;

use crate::bail;
use crate::ddl::{DdlCompiler, DdlOutcome};
use crate::error::{ErrorKind, SiphonResult};
use crate::position::Position;
use crate::source::{LogRecord, LogStream, SourceConnector};

/// One scripted step of a stream.
#[derive(Debug, Clone)]
pub enum ScriptedItem {
    /// Yield this record.
    Record(LogRecord),
    /// Fail the read with a decode error carrying this detail.
    Error(String),
    /// Never complete the read; the consumer's idle timeout fires.
    Hang,
}

/// A [`LogStream`] yielding scripted items. Once the script runs out it hangs, like an
/// idle source.
pub struct ScriptedStream {
    items: VecDeque<ScriptedItem>,
}

impl ScriptedStream {
    pub fn new(items: Vec<ScriptedItem>) -> Self {
        Self {
            items: items.into(),
        }
    }
}

impl LogStream for ScriptedStream {
    async fn next_record(&mut self) -> SiphonResult<LogRecord> {
        match self.items.pop_front() {
            Some(ScriptedItem::Record(record)) => Ok(record),
            Some(ScriptedItem::Error(detail)) => {
                bail!(ErrorKind::SourceDecodeError, "scripted stream error", detail)
            }
            Some(ScriptedItem::Hang) | None => std::future::pending().await,
        }
    }
}

#[derive(Default)]
struct ConnectorInner {
    /// Scripts per source name, consumed one per connection attempt.
    scripts: HashMap<String, VecDeque<Vec<ScriptedItem>>>,
    /// Recorded connect calls: (source name, start position string).
    connects: Vec<(String, String)>,
}

/// A [`SourceConnector`] handing out scripted streams.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    inner: Arc<Mutex<ConnectorInner>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a script for the next connection attempt of `source`.
    pub async fn push_script(&self, source: &str, items: Vec<ScriptedItem>) {
        let mut inner = self.inner.lock().await;
        inner
            .scripts
            .entry(source.to_string())
            .or_default()
            .push_back(items);
    }

    /// Returns the recorded connect calls: (source name, start position string).
    pub async fn connects(&self) -> Vec<(String, String)> {
        let inner = self.inner.lock().await;
        inner.connects.clone()
    }
}

impl SourceConnector for ScriptedConnector {
    type Stream = ScriptedStream;

    async fn connect(&self, source: &SourceConfig, start: &Position) -> SiphonResult<ScriptedStream> {
        let mut inner = self.inner.lock().await;
        inner
            .connects
            .push((source.name.clone(), start.to_string()));

        let script = inner
            .scripts
            .get_mut(&source.name)
            .and_then(VecDeque::pop_front);

        match script {
            Some(items) => Ok(ScriptedStream::new(items)),
            None => {
                bail!(
                    ErrorKind::SourceConnectionFailed,
                    "no script queued for source",
                    source.name.clone()
                )
            }
        }
    }
}

/// A [`DdlCompiler`] with scripted outcomes per statement text.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCompiler {
    outcomes: HashMap<String, DdlOutcome>,
}

impl ScriptedCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the outcome returned for `statement`.
    pub fn with(mut self, statement: &str, outcome: DdlOutcome) -> Self {
        self.outcomes.insert(statement.to_string(), outcome);
        self
    }
}

impl DdlCompiler for ScriptedCompiler {
    fn compile(&self, statement: &str, _default_schema: &str) -> SiphonResult<DdlOutcome> {
        Ok(self
            .outcomes
            .get(statement)
            .cloned()
            .unwrap_or(DdlOutcome::NoOp))
    }
}

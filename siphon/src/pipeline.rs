//! The pipeline coordinator.
//!
//! Wires the per-source stream consumers into the destination engine, owns reconnect
//! supervision, and exposes the narrow operator handles. One tokio task runs per
//! source, one task supervises reconnects, and one task runs the destination engine,
//! which is the sole owner of the warehouse connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use siphon_config::shared::{PipelineConfig, SourceConfig};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bail;
use crate::concurrency::review::ManualReviewGate;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::ddl::DdlCompiler;
use crate::destination::engine::{CommittedPositions, make_handles};
use crate::destination::{DestinationEngine, EngineSnapshot, InspectHandle, SkipHandle, Warehouse};
use crate::error::{ErrorKind, SiphonResult};
use crate::position::Position;
use crate::siphon_error;
use crate::source::{SourceConnector, run_consumer};
use crate::types::PipelineEvent;

/// Unique identifier of a pipeline instance.
pub type PipelineId = u64;

/// Maximum jitter fraction added to reconnect delays.
const RECONNECT_JITTER: f64 = 0.3;

enum PipelineState<W, C> {
    NotStarted {
        warehouse: W,
        compiler: C,
    },
    Started {
        engine: JoinHandle<SiphonResult<()>>,
        supervisor: JoinHandle<()>,
        events_tx: mpsc::Sender<PipelineEvent>,
    },
    Finished,
}

/// Detached handle that can trigger a pipeline shutdown from another task.
#[derive(Clone)]
pub struct PipelineShutdown {
    shutdown_tx: ShutdownTx,
    events_tx: Option<mpsc::Sender<PipelineEvent>>,
}

impl PipelineShutdown {
    /// Signals the pipeline to stop, like [`Pipeline::shutdown`].
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if let Some(events_tx) = &self.events_tx {
            let _ = events_tx.send(PipelineEvent::Shutdown).await;
        }
    }
}

/// A replication pipeline from a set of sources into one warehouse.
pub struct Pipeline<W, C, K> {
    id: PipelineId,
    config: Arc<PipelineConfig>,
    connector: K,
    state: PipelineState<W, C>,
    shutdown_tx: ShutdownTx,
    shutdown_rx: ShutdownRx,
    review: ManualReviewGate,
    inspect: Arc<Mutex<EngineSnapshot>>,
}

impl<W, C, K> Pipeline<W, C, K>
where
    W: Warehouse + Sync,
    C: DdlCompiler + Sync,
    K: SourceConnector,
{
    /// Creates a pipeline. Nothing runs until [`Pipeline::start`] is called.
    pub fn new(id: PipelineId, config: PipelineConfig, connector: K, compiler: C, warehouse: W) -> Self {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        Self {
            id,
            config: Arc::new(config),
            connector,
            state: PipelineState::NotStarted {
                warehouse,
                compiler,
            },
            shutdown_tx,
            shutdown_rx,
            review: ManualReviewGate::new(),
            inspect: Arc::new(Mutex::new(EngineSnapshot::default())),
        }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// Handle for resolving manual-review schema statements.
    pub fn skip_handle(&self) -> SkipHandle {
        make_handles(&self.review, &self.inspect).0
    }

    /// Handle for reading the engine's staging snapshot.
    pub fn inspect_handle(&self) -> InspectHandle {
        make_handles(&self.review, &self.inspect).1
    }

    /// Starts the pipeline: seeds start positions from the durable store, spawns the
    /// consumer tasks, the reconnect supervisor, and the destination engine.
    pub async fn start(&mut self) -> SiphonResult<()> {
        let state = std::mem::replace(&mut self.state, PipelineState::Finished);
        let (mut warehouse, compiler) = match state {
            PipelineState::NotStarted {
                warehouse,
                compiler,
            } => (warehouse, compiler),
            other => {
                self.state = other;
                bail!(ErrorKind::InvalidState, "pipeline was already started");
            }
        };

        info!(
            id = self.id,
            sources = self.config.sources.len(),
            "starting pipeline"
        );

        self.config
            .validate()
            .map_err(|err| siphon_error!(ErrorKind::ConfigError, "invalid pipeline configuration", err))?;

        warehouse.ensure_position_store().await?;

        // Resolve every source's start position: durable store first, configured
        // fallback otherwise. Configured positions are parsed up front so a typo
        // fails startup instead of a consumer.
        let committed: CommittedPositions = Arc::new(Mutex::new(HashMap::new()));
        let mut start_positions: HashMap<String, Position> = HashMap::new();
        for source in &self.config.sources {
            for schema in &source.schemas {
                if let Some(raw) = &schema.resume_position {
                    raw.parse::<Position>()?;
                }
            }

            let position = match warehouse.load_position(&source.name).await? {
                Some(stored) => {
                    info!(source = %source.name, position = %stored, "resuming from stored position");
                    stored.parse::<Position>()?
                }
                None => source
                    .position
                    .as_deref()
                    .unwrap_or_default()
                    .parse::<Position>()?,
            };

            committed
                .lock()
                .await
                .insert(source.name.clone(), position.clone());
            start_positions.insert(source.name.clone(), position);
        }

        let (events_tx, events_rx) = mpsc::channel(self.config.event_channel_capacity);
        let (reconnect_tx, reconnect_rx) = mpsc::channel(self.config.sources.len().max(1));

        for source in self.config.sources.iter().cloned() {
            let start = start_positions.remove(&source.name).unwrap_or_default();
            spawn_consumer(
                self.connector.clone(),
                source,
                start,
                events_tx.clone(),
                reconnect_tx.clone(),
                self.shutdown_rx.clone(),
            );
        }

        let supervisor = tokio::spawn(run_reconnect_supervisor(
            self.connector.clone(),
            reconnect_rx,
            reconnect_tx,
            events_tx.clone(),
            committed.clone(),
            self.shutdown_rx.clone(),
        ));

        let engine = DestinationEngine::new(
            warehouse,
            compiler,
            self.config.flush.clone(),
            self.review.clone(),
            self.inspect.clone(),
            committed,
        );
        let engine = tokio::spawn(engine.run(events_rx));

        self.state = PipelineState::Started {
            engine,
            supervisor,
            events_tx,
        };

        Ok(())
    }

    /// Returns a handle that can shut the pipeline down from another task.
    ///
    /// Taken after [`Pipeline::start`], the handle also delivers the engine's
    /// shutdown sentinel; taken before, it only signals the producers.
    pub fn shutdown_handle(&self) -> PipelineShutdown {
        let events_tx = match &self.state {
            PipelineState::Started { events_tx, .. } => Some(events_tx.clone()),
            _ => None,
        };

        PipelineShutdown {
            shutdown_tx: self.shutdown_tx.clone(),
            events_tx,
        }
    }

    /// Signals every task to stop: consumers through the shutdown channel, the engine
    /// through the shutdown sentinel.
    pub async fn shutdown(&self) {
        info!(id = self.id, "shutting down pipeline");

        let _ = self.shutdown_tx.send(());

        if let PipelineState::Started { events_tx, .. } = &self.state {
            let _ = events_tx.send(PipelineEvent::Shutdown).await;
        }
    }

    /// Waits for the destination engine to finish and returns its result.
    ///
    /// When the engine fails, producers are shut down before returning so no task
    /// outlives the pipeline.
    pub async fn wait(self) -> SiphonResult<()> {
        let PipelineState::Started {
            engine,
            supervisor,
            events_tx,
        } = self.state
        else {
            info!("pipeline was not started, nothing to wait for");
            return Ok(());
        };

        let result = match engine.await {
            Ok(result) => result,
            Err(err) => Err(siphon_error!(
                ErrorKind::InvalidState,
                "destination engine task panicked",
                err
            )),
        };

        if let Err(err) = &result {
            error!(error = %err, "destination engine failed");
        }

        // The engine is gone; stop producers and the supervisor regardless of how it
        // ended.
        let _ = self.shutdown_tx.send(());
        drop(events_tx);
        let _ = supervisor.await;

        result
    }

    /// Convenience for [`Pipeline::shutdown`] followed by [`Pipeline::wait`].
    pub async fn shutdown_and_wait(self) -> SiphonResult<()> {
        self.shutdown().await;
        self.wait().await
    }
}

/// Spawns one consumer task: connect, then stream until timeout/error/shutdown.
fn spawn_consumer<K: SourceConnector>(
    connector: K,
    source: SourceConfig,
    start: Position,
    events_tx: mpsc::Sender<PipelineEvent>,
    reconnect_tx: mpsc::Sender<SourceConfig>,
    shutdown_rx: ShutdownRx,
) {
    tokio::spawn(async move {
        match connector.connect(&source, &start).await {
            Ok(stream) => {
                run_consumer(source, stream, start, events_tx, reconnect_tx, shutdown_rx).await;
            }
            Err(err) => {
                warn!(source = %source.name, error = %err, "source connection failed");
                let _ = reconnect_tx.send(source).await;
            }
        }
    });
}

/// Supervises reconnect requests.
///
/// Each request schedules a delayed reconnect on its own task, resuming from the
/// committed-position map rather than any consumer's in-memory position.
async fn run_reconnect_supervisor<K: SourceConnector>(
    connector: K,
    mut reconnect_rx: mpsc::Receiver<SourceConfig>,
    reconnect_tx: mpsc::Sender<SourceConfig>,
    events_tx: mpsc::Sender<PipelineEvent>,
    committed: CommittedPositions,
    mut shutdown_rx: ShutdownRx,
) {
    loop {
        let source = tokio::select! {
            _ = shutdown_rx.changed() => return,
            request = reconnect_rx.recv() => match request {
                Some(source) => source,
                None => return,
            },
        };

        let delay = jittered(Duration::from_secs(source.reconnect_delay_secs));
        info!(
            source = %source.name,
            delay_ms = delay.as_millis() as u64,
            "scheduling source reconnect"
        );

        let connector = connector.clone();
        let events_tx = events_tx.clone();
        let reconnect_tx = reconnect_tx.clone();
        let committed = committed.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let start = committed
                .lock()
                .await
                .get(&source.name)
                .cloned()
                .unwrap_or_default();
            info!(
                source = %source.name,
                position = %start,
                "reconnecting from last committed position"
            );

            spawn_consumer(connector, source, start, events_tx, reconnect_tx, shutdown_rx);
        });
    }
}

/// Adds up to [`RECONNECT_JITTER`] of random jitter to a delay.
fn jittered(delay: Duration) -> Duration {
    let jitter = 1.0 + rand::thread_rng().r#gen::<f64>() * RECONNECT_JITTER;
    delay.mul_f64(jitter)
}

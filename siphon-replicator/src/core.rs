use siphon::ddl::ConservativeCompiler;
use siphon::destination::postgres::PostgresWarehouse;
use siphon::pipeline::Pipeline;
use siphon::source::replay::ReplayConnector;
use siphon_config::shared::ReplicatorConfig;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

/// Starts the replicator service with the provided configuration.
///
/// Connects the warehouse, wires the configured source drivers, and runs the pipeline
/// until a termination signal arrives or the destination engine fails.
pub async fn start_replicator_with_config(
    replicator_config: ReplicatorConfig,
) -> anyhow::Result<()> {
    info!("starting replicator service");

    replicator_config.validate()?;
    log_config(&replicator_config);

    let warehouse = PostgresWarehouse::connect(&replicator_config.warehouse).await?;

    // Every configured driver kind replays captured records; real log transports plug
    // in through the `SourceConnector` seam of the library API.
    let mut pipeline = Pipeline::new(
        replicator_config.pipeline.id,
        replicator_config.pipeline.clone(),
        ReplayConnector::new(),
        ConservativeCompiler::new(),
        warehouse,
    );

    pipeline.start().await?;

    let shutdown = pipeline.shutdown_handle();
    tokio::spawn(async move {
        wait_for_termination_signal().await;
        info!("termination signal received, shutting down pipeline");
        shutdown.shutdown().await;
    });

    pipeline.wait().await?;

    info!("replicator service completed");

    Ok(())
}

/// Waits for SIGINT or SIGTERM.
async fn wait_for_termination_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

/// Logs the effective configuration, without secrets.
fn log_config(config: &ReplicatorConfig) {
    for source in &config.pipeline.sources {
        info!(
            source = %source.name,
            idle_timeout_secs = source.idle_timeout_secs,
            reconnect_delay_secs = source.reconnect_delay_secs,
            schema_filters = source.schemas.len(),
            "configured source"
        );
    }

    info!(
        host = %config.warehouse.connection.host,
        port = config.warehouse.connection.port,
        database = %config.warehouse.connection.name,
        tls = config.warehouse.connection.tls.enabled,
        flush_max_transactions = config.pipeline.flush.max_transactions,
        flush_max_fill_ms = config.pipeline.flush.max_fill_ms,
        "configured warehouse"
    );
}

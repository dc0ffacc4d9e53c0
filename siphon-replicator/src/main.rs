//! siphon replicator service binary.
//!
//! Loads configuration, initializes tracing, and runs the replication pipeline until
//! a termination signal or a fatal destination error.

use siphon_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_replicator_config;
use crate::core::start_replicator_with_config;
use crate::error::{ReplicatorError, ReplicatorResult};

mod config;
mod core;
mod error;

fn main() -> ReplicatorResult<()> {
    let replicator_config = load_replicator_config()?;

    init_tracing(env!("CARGO_BIN_NAME"));

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(replicator_config))
}

async fn async_main(
    replicator_config: siphon_config::shared::ReplicatorConfig,
) -> ReplicatorResult<()> {
    if let Err(err) = start_replicator_with_config(replicator_config).await {
        error!("replicator failed: {err:#}");
        return Err(ReplicatorError::Runtime(err));
    }

    Ok(())
}

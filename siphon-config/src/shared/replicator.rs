use serde::Deserialize;

use crate::load::Config;
use crate::shared::{PgConnectionConfig, PipelineConfig, ValidationError};

/// Top-level configuration for the replicator service.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicatorConfig {
    /// Pipeline configuration: sources, flush policy, channels.
    pub pipeline: PipelineConfig,
    /// Warehouse the pipeline writes to.
    pub warehouse: WarehouseConfig,
}

impl ReplicatorConfig {
    /// Validates the whole replicator configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.pipeline.validate()?;
        self.warehouse.validate()?;

        Ok(())
    }
}

impl Config for ReplicatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

/// Configuration for the analytical warehouse destination.
#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    /// Connection settings for the warehouse.
    pub connection: PgConnectionConfig,
}

impl WarehouseConfig {
    /// Validates the warehouse configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.connection.validate()
    }
}

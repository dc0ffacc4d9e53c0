use std::collections::HashSet;

use serde::Deserialize;

use crate::shared::{FlushConfig, SourceConfig, ValidationError};

/// Configuration for a replication pipeline.
///
/// Contains every setting the pipeline coordinator needs: the sources to tail, the
/// flush policy of the destination engine, and channel sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Unique identifier for this pipeline.
    pub id: u64,
    /// Sources to replicate from. Each source runs its own consumer task.
    pub sources: Vec<SourceConfig>,
    /// Flush policy for the destination engine.
    #[serde(default)]
    pub flush: FlushConfig,
    /// Capacity of the bounded channel merging source events into the engine.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl PipelineConfig {
    /// Validates the pipeline configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.sources.is_empty() {
            return Err(ValidationError::NoSourcesConfigured);
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !names.insert(source.name.as_str()) {
                return Err(ValidationError::DuplicateSourceName(source.name.clone()));
            }
        }

        self.flush.validate()?;

        if self.event_channel_capacity == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "event_channel_capacity".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn default_event_channel_capacity() -> usize {
    128
}

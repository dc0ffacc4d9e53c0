use std::path::PathBuf;

use serde::Deserialize;

use crate::shared::ValidationError;

/// Configuration for a single replication source.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Stable name of the source, used as the key for durable positions.
    pub name: String,
    /// Driver used to read the source's replication log.
    pub driver: SourceDriverConfig,
    /// Starting position, used only when the durable store holds no position for this
    /// source yet. Canonical form `id:start-last[,id2:start-last...]`.
    #[serde(default)]
    pub position: Option<String>,
    /// Seconds without a log record before the stream is considered dead and recycled.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Seconds to wait before reconnecting a failed source.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Per-schema replication filters. When empty, every schema is replicated.
    #[serde(default)]
    pub schemas: Vec<SchemaFilterConfig>,
}

impl SourceConfig {
    /// Validates the source settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "source.name".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.idle_timeout_secs == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("source `{}` idle_timeout_secs", self.name),
                constraint: "must be greater than 0".to_string(),
            });
        }

        for schema in &self.schemas {
            if !schema.sync.is_empty() && !schema.exclude.is_empty() {
                return Err(ValidationError::InvalidFieldValue {
                    field: format!("source `{}` schema `{}`", self.name, schema.name),
                    constraint: "sync and exclude lists are mutually exclusive".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Driver used to read a source's replication log.
///
/// The log transport itself is an external collaborator consumed through the
/// `LogStream` trait; this enum configures which built-in driver wires it up.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDriverConfig {
    /// Replays captured log records from a newline-delimited JSON file.
    Replay {
        /// Path of the capture file.
        path: PathBuf,
    },
}

/// Replication filter for one source schema.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaFilterConfig {
    /// Name of the schema this filter applies to.
    pub name: String,
    /// When non-empty, only these tables are replicated.
    #[serde(default)]
    pub sync: Vec<String>,
    /// When non-empty (and `sync` is empty), these tables are skipped.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Historical resume position for this schema: transactions not later than it are
    /// dropped because they were already applied from a backfill.
    #[serde(default)]
    pub resume_position: Option<String>,
}

fn default_idle_timeout_secs() -> u64 {
    90
}

fn default_reconnect_delay_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay_source(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            driver: SourceDriverConfig::Replay {
                path: PathBuf::from("capture.jsonl"),
            },
            position: None,
            idle_timeout_secs: default_idle_timeout_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            schemas: Vec::new(),
        }
    }

    #[test]
    fn valid_source_passes() {
        assert!(replay_source("orders").validate().is_ok());
    }

    #[test]
    fn empty_name_fails() {
        assert!(replay_source("  ").validate().is_err());
    }

    #[test]
    fn sync_and_exclude_are_mutually_exclusive() {
        let mut source = replay_source("orders");
        source.schemas.push(SchemaFilterConfig {
            name: "shop".to_string(),
            sync: vec!["orders".to_string()],
            exclude: vec!["carts".to_string()],
            resume_position: None,
        });
        assert!(source.validate().is_err());
    }
}

use serde::Deserialize;

use crate::shared::ValidationError;

/// Flush policy for the destination engine.
///
/// A flush is triggered when the number of staged transactions reaches
/// [`FlushConfig::max_transactions`], or when staged work is older than
/// [`FlushConfig::max_fill_ms`]. The age condition is evaluated on every loop iteration,
/// including idle ticks, so time-based flushes also fire with no incoming traffic.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FlushConfig {
    /// Maximum number of staged transactions before a flush is forced.
    #[serde(default = "default_max_transactions")]
    pub max_transactions: usize,
    /// Maximum time, in milliseconds, staged work may wait before a flush is forced.
    #[serde(default = "default_max_fill_ms")]
    pub max_fill_ms: u64,
    /// Interval, in milliseconds, of the idle tick used to evaluate time-based flushes
    /// when no events arrive.
    #[serde(default = "default_idle_tick_ms")]
    pub idle_tick_ms: u64,
    /// Maximum number of key tuples packed into a single batched delete statement.
    #[serde(default = "default_delete_pack")]
    pub delete_pack: usize,
}

impl FlushConfig {
    pub const DEFAULT_MAX_TRANSACTIONS: usize = 1000;
    pub const DEFAULT_MAX_FILL_MS: u64 = 60_000;
    pub const DEFAULT_IDLE_TICK_MS: u64 = 10_000;
    pub const DEFAULT_DELETE_PACK: usize = 5000;

    /// Validates flush policy settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_transactions == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "flush.max_transactions".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.idle_tick_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "flush.idle_tick_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.delete_pack == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "flush.delete_pack".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            max_transactions: default_max_transactions(),
            max_fill_ms: default_max_fill_ms(),
            idle_tick_ms: default_idle_tick_ms(),
            delete_pack: default_delete_pack(),
        }
    }
}

fn default_max_transactions() -> usize {
    FlushConfig::DEFAULT_MAX_TRANSACTIONS
}

fn default_max_fill_ms() -> u64 {
    FlushConfig::DEFAULT_MAX_FILL_MS
}

fn default_idle_tick_ms() -> u64 {
    FlushConfig::DEFAULT_IDLE_TICK_MS
}

fn default_delete_pack() -> usize {
    FlushConfig::DEFAULT_DELETE_PACK
}

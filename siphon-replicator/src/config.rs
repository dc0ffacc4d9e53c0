use siphon_config::shared::ReplicatorConfig;
use siphon_config::{LoadConfigError, load_config};

/// Loads the replicator configuration from the `configuration/` directory and
/// environment overrides.
pub fn load_replicator_config() -> Result<ReplicatorConfig, LoadConfigError> {
    load_config::<ReplicatorConfig>()
}

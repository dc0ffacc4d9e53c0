use siphon_config::LoadConfigError;
use thiserror::Error;

/// Convenient result type for the replicator binary.
pub type ReplicatorResult<T> = Result<T, ReplicatorError>;

/// Errors surfacing at the replicator's process boundary.
#[derive(Debug, Error)]
pub enum ReplicatorError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] LoadConfigError),

    /// The async runtime could not be built.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The pipeline failed while running.
    #[error("runtime error: {0}")]
    Runtime(#[source] anyhow::Error),
}

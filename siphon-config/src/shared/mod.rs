//! Shared configuration types for siphon pipelines.

mod connection;
mod flush;
mod pipeline;
mod replicator;
mod source;

use thiserror::Error;

pub use connection::{PgConnectionConfig, TlsConfig};
pub use flush::FlushConfig;
pub use pipeline::PipelineConfig;
pub use replicator::{ReplicatorConfig, WarehouseConfig};
pub use source::{SchemaFilterConfig, SourceConfig, SourceDriverConfig};

/// Errors produced by configuration validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// TLS was enabled without any trusted root certificates.
    #[error("tls is enabled but no trusted root certificates were provided")]
    MissingTrustedRootCerts,

    /// The pipeline has no sources to replicate from.
    #[error("at least one source must be configured")]
    NoSourcesConfigured,

    /// Two sources share the same name.
    #[error("source name `{0}` is configured more than once")]
    DuplicateSourceName(String),

    /// A field holds a value outside its accepted range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue {
        field: String,
        constraint: String,
    },
}

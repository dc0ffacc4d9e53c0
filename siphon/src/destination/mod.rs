//! Destination side of the pipeline: the warehouse seam, the per-table staging caches,
//! and the single-consumer engine that applies events atomically with position updates.

mod base;
pub(crate) mod engine;
mod enums;
pub mod memory;
pub mod postgres;
mod table_cache;

pub use base::{ConstraintKind, CopyOutcome, TableConstraint, TableMeta, Warehouse};
pub use engine::{
    DestinationEngine, EngineSnapshot, InspectHandle, SkipHandle, TableCacheSnapshot,
};
pub use enums::EnumColumn;

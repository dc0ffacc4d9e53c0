//! siphon replicates row and schema changes from a database replication log into an
//! analytical warehouse, tracking a durable, resumable position per source.
//!
//! The crate is organized around three moving parts: per-source stream consumers that
//! turn decoded log records into transaction-scoped events, a single-consumer
//! destination engine that stages, deduplicates and atomically flushes those events
//! together with the position update, and a coordinator that wires the two together
//! and supervises reconnects.

pub mod concurrency;
pub mod ddl;
pub mod destination;
pub mod error;
pub mod macros;
pub mod pipeline;
pub mod position;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;

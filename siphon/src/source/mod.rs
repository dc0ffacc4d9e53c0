//! Source side of the pipeline: the decoded log-record contract, the transport traits
//! implemented by source drivers, the per-source stream consumer, and the built-in
//! replay driver.

mod connector;
mod consumer;
mod record;
pub mod replay;

pub use connector::{LogStream, SourceConnector};
pub(crate) use consumer::run_consumer;
pub use record::{LogRecord, RowsKind};

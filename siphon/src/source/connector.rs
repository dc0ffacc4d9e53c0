use std::future::Future;

use siphon_config::shared::SourceConfig;

use crate::error::SiphonResult;
use crate::position::Position;
use crate::source::record::LogRecord;

/// A live, decoded replication-log stream.
///
/// Implementations wrap the raw log transport of one source and yield decoded
/// [`LogRecord`]s. Reads may block indefinitely; the stream consumer bounds every read
/// with the source's configured idle timeout, and a timed-out or failed stream is
/// discarded and re-established through the reconnect path, so implementations do not
/// need their own liveness handling.
pub trait LogStream: Send {
    /// Reads the next decoded record from the log.
    fn next_record(&mut self) -> impl Future<Output = SiphonResult<LogRecord>> + Send;
}

/// Factory for [`LogStream`]s, used for the initial connection and every reconnect.
///
/// `start` is the position replication should resume from. On reconnects the
/// coordinator always passes the last durably committed position, never the failed
/// consumer's in-memory position.
pub trait SourceConnector: Clone + Send + Sync + 'static {
    type Stream: LogStream + 'static;

    /// Establishes a stream for `source`, resuming from `start`.
    fn connect(
        &self,
        source: &SourceConfig,
        start: &Position,
    ) -> impl Future<Output = SiphonResult<Self::Stream>> + Send;
}

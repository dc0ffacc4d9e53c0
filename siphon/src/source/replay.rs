//! Replay driver: reads captured log records from a newline-delimited JSON file.
//!
//! Useful for development and for re-applying a captured record stream against a fresh
//! warehouse. Once the capture is exhausted the stream goes idle, so a replayed source
//! is eventually recycled by the consumer's idle timeout like any silent source.

use std::path::Path;

use siphon_config::shared::{SourceConfig, SourceDriverConfig};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::info;

use crate::error::SiphonResult;
use crate::position::Position;
use crate::siphon_error;
use crate::source::connector::{LogStream, SourceConnector};
use crate::source::record::LogRecord;

/// Connector for [`SourceDriverConfig::Replay`] sources.
#[derive(Debug, Clone, Default)]
pub struct ReplayConnector;

impl ReplayConnector {
    pub fn new() -> Self {
        Self
    }
}

impl SourceConnector for ReplayConnector {
    type Stream = ReplayStream;

    /// Opens the capture file for `source`.
    ///
    /// The capture is always replayed from its beginning; resumption is handled by the
    /// destination's dedup and by per-schema resume positions, not by seeking.
    async fn connect(&self, source: &SourceConfig, _start: &Position) -> SiphonResult<ReplayStream> {
        let SourceDriverConfig::Replay { path } = &source.driver;

        info!(source = %source.name, path = %path.display(), "opening replay capture");
        ReplayStream::open(path).await
    }
}

/// A [`LogStream`] yielding records from a capture file, one JSON record per line.
pub struct ReplayStream {
    lines: Lines<BufReader<File>>,
    exhausted: bool,
}

impl ReplayStream {
    /// Opens a capture file.
    pub async fn open(path: &Path) -> SiphonResult<Self> {
        let file = File::open(path).await?;

        Ok(Self {
            lines: BufReader::new(file).lines(),
            exhausted: false,
        })
    }
}

impl LogStream for ReplayStream {
    async fn next_record(&mut self) -> SiphonResult<LogRecord> {
        loop {
            if self.exhausted {
                // Nothing more to replay: behave like an idle source.
                std::future::pending::<()>().await;
            }

            match self.lines.next_line().await? {
                None => {
                    self.exhausted = true;
                }
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    return serde_json::from_str(&line).map_err(|err| {
                        siphon_error!(
                            crate::error::ErrorKind::SourceDecodeError,
                            "capture file holds an undecodable record",
                            line,
                            source: err
                        )
                    });
                }
            }
        }
    }
}

//! Shutdown signaling for pipeline tasks.
//!
//! Abstracts tokio's watch channel into a broadcast-style shutdown signal: all
//! subscribers observe the same notification, and late subscribers created after the
//! signal fired still observe it on their first check.

use tokio::sync::watch;

/// Transmitter side of the shutdown signal.
pub type ShutdownTx = watch::Sender<()>;

/// Receiver side of the shutdown signal.
pub type ShutdownRx = watch::Receiver<()>;

/// Creates a new shutdown signal channel.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    watch::channel(())
}

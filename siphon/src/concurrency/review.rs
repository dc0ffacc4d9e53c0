//! Single-slot handoff used to park schema statements that need operator review.
//!
//! The gate is deliberately not a queue: the destination engine holds at most one
//! blocked statement and suspends until an operator consumes it. Queueing manual-review
//! statements would change operational semantics, because applying later events while an
//! unresolved schema change is pending is unsafe.

use std::sync::Arc;

use tokio::sync::{Mutex, oneshot};

/// A statement parked in the gate, together with the engine's release handle.
#[derive(Debug)]
struct Blocked {
    statement: String,
    release: oneshot::Sender<()>,
}

/// Single-slot rendezvous between the destination engine and an operator.
///
/// The engine parks a statement with [`ManualReviewGate::hold`], which suspends until
/// [`ManualReviewGate::take`] consumes it. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct ManualReviewGate {
    slot: Arc<Mutex<Option<Blocked>>>,
}

impl ManualReviewGate {
    /// Creates an empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `statement` in the gate and suspends until an operator takes it.
    pub async fn hold(&self, statement: String) {
        let (release, released) = oneshot::channel();

        {
            let mut slot = self.slot.lock().await;
            *slot = Some(Blocked { statement, release });
        }

        // An error here means the blocked entry was dropped without an explicit
        // release, which only happens on teardown; resuming is the right response
        // either way.
        let _ = released.await;
    }

    /// Takes the parked statement, releasing the suspended engine.
    ///
    /// Returns [`None`] when nothing is parked.
    pub async fn take(&self) -> Option<String> {
        let blocked = self.slot.lock().await.take()?;
        let _ = blocked.release.send(());

        Some(blocked.statement)
    }

    /// Returns a copy of the parked statement without releasing the engine.
    pub async fn pending(&self) -> Option<String> {
        let slot = self.slot.lock().await;
        slot.as_ref().map(|blocked| blocked.statement.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn hold_blocks_until_taken() {
        let gate = ManualReviewGate::new();

        let held = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.hold("alter table widgets".to_string()).await;
            })
        };

        // Wait for the statement to be parked.
        while gate.pending().await.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!held.is_finished());

        let taken = gate.take().await;
        assert_eq!(taken.as_deref(), Some("alter table widgets"));

        held.await.unwrap();
        assert!(gate.pending().await.is_none());
    }

    #[tokio::test]
    async fn take_on_empty_gate_returns_none() {
        let gate = ManualReviewGate::new();
        assert_eq!(gate.take().await, None);
    }
}

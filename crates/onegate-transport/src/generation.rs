//! Generation counters for invalidating in-flight timers.
//!
//! Long-lived loops (reconnect, heartbeat) capture the generation current at
//! their start. Stopping bumps the counter; any timer that fires afterwards
//! sees a stale stamp and exits without acting.

use std::sync::Arc;

use tokio::sync::watch;

/// A shared, monotonically increasing generation counter.
#[derive(Debug, Clone)]
pub struct Generation {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for Generation {
    fn default() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(0)),
        }
    }
}

impl Generation {
    /// Creates a counter at generation `0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current generation.
    pub fn current(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Starts a new generation and returns it.
    pub fn advance(&self) -> u64 {
        self.tx.send_modify(|g| *g += 1);
        self.current()
    }

    /// Returns `true` if `stamp` is still the current generation.
    pub fn is_current(&self, stamp: u64) -> bool {
        self.current() == stamp
    }

    /// Receiver that wakes whenever the generation advances.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

//! Counting semaphore bounding simultaneous simulations.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::ExecutionError;
use crate::node::NodeId;

use super::CancellationToken;

/// How often a blocked acquire re-checks its cancellation token.
const CANCEL_POLL: Duration = Duration::from_millis(5);

/// A fixed pool of permits shared by every tree.
///
/// The channel holds one token per free permit. Acquiring takes a token and
/// dropping the permit puts it back, so permits are released on success,
/// error, panic unwinding and cancellation alike.
pub struct SimulationPermits {
    tx: Sender<()>,
    rx: Receiver<()>,
    capacity: usize,
}

impl fmt::Debug for SimulationPermits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationPermits")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// A held permit; released on drop.
#[must_use = "the permit is released as soon as it is dropped"]
#[derive(Debug)]
pub struct SimulationPermit<'a> {
    tx: &'a Sender<()>,
}

impl Drop for SimulationPermit<'_> {
    fn drop(&mut self) {
        // Capacity equals the token count, so this never blocks.
        let _ = self.tx.try_send(());
    }
}

fn closed() -> ExecutionError {
    ExecutionError::ThreadPool {
        message: "simulation permit channel closed".to_string(),
    }
}

impl SimulationPermits {
    /// Creates `capacity` permits (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded::<()>(capacity);
        for _ in 0..capacity {
            let _ = tx.try_send(());
        }
        Self { tx, rx, capacity }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    #[must_use]
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Takes a permit if one is free.
    pub fn try_acquire(&self) -> Option<SimulationPermit<'_>> {
        match self.rx.try_recv() {
            Ok(()) => Some(SimulationPermit { tx: &self.tx }),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Blocks until a permit is free or `token` is cancelled.
    ///
    /// # Errors
    ///
    /// `Cancelled` for `node_id` when the token fires while waiting.
    pub fn acquire(&self, token: &CancellationToken, node_id: &NodeId) -> Result<SimulationPermit<'_>, ExecutionError> {
        loop {
            token.check(node_id)?;
            match self.rx.recv_timeout(CANCEL_POLL) {
                Ok(()) => return Ok(SimulationPermit { tx: &self.tx }),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(closed()),
            }
        }
    }
}
